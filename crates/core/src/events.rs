use std::fmt;

use thiserror::Error;

pub const KEY_EVENTS_START_MARKER: &str = "START OF KEY EVENTS:";
pub const KEY_EVENTS_END_MARKER: &str = "END OF KEY EVENTS:";
pub const DEFAULT_KEY_EVENT_CHUNK_SIZE: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("key event batch size must be greater than zero")]
    ZeroBatchSize,
}

/// One plot point to dramatize, taken verbatim (trimmed) from the
/// instructions document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent(String);

impl KeyEvent {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collects the non-empty lines between the start and end markers. Without a
/// start marker the result is empty; without an end marker collection runs to
/// the end of the document. The first end marker stops the scan even when it
/// precedes the start marker.
pub fn extract_key_events(instructions: &str) -> Vec<KeyEvent> {
    let mut events = Vec::new();
    let mut in_events = false;
    for line in instructions.lines() {
        let line = line.trim();
        if line == KEY_EVENTS_START_MARKER {
            in_events = true;
            continue;
        }
        if line == KEY_EVENTS_END_MARKER {
            break;
        }
        if in_events && !line.is_empty() {
            events.push(KeyEvent::new(line));
        }
    }
    events
}

/// Partitions `items` into consecutive groups of at most `size` elements.
pub fn chunk_list<T: Clone>(items: &[T], size: usize) -> Result<Vec<Vec<T>>, EventError> {
    if size == 0 {
        return Err(EventError::ZeroBatchSize);
    }
    Ok(items.chunks(size).map(<[T]>::to_vec).collect())
}

/// A group of key events handled by a single generation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventBatch {
    index: usize,
    first_position: usize,
    events: Vec<KeyEvent>,
}

impl EventBatch {
    /// Zero-based batch index.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn events(&self) -> &[KeyEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// One-based, inclusive range of the events in the full list, e.g. `6-10`.
    pub fn range_label(&self) -> String {
        format!(
            "{}-{}",
            self.first_position + 1,
            self.first_position + self.events.len()
        )
    }

    pub fn bulleted(&self) -> String {
        self.events
            .iter()
            .map(|event| format!("- {event}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn batch_events(events: &[KeyEvent], batch_size: usize) -> Result<Vec<EventBatch>, EventError> {
    let groups = chunk_list(events, batch_size)?;
    Ok(groups
        .into_iter()
        .enumerate()
        .map(|(index, events)| EventBatch {
            index,
            first_position: index * batch_size,
            events,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTRUCTIONS: &str = "\
Write the next chapter for young readers.

START OF KEY EVENTS:
  The company leaves Rivendell at dusk.

Gandalf warns them about the pass.
Snow begins to fall.


The wolves howl in the distance.
Boromir suggests going south.

Frodo carries the ring in silence.
They reach the doors of Moria.
END OF KEY EVENTS:
This line is outside the markers.
";

    #[test]
    fn extracts_events_between_markers() {
        let events = extract_key_events(INSTRUCTIONS);
        assert_eq!(events.len(), 7);
        assert_eq!(events[0].as_str(), "The company leaves Rivendell at dusk.");
        assert_eq!(events[6].as_str(), "They reach the doors of Moria.");
        assert!(events.iter().all(|event| !event.as_str().is_empty()));
    }

    #[test]
    fn missing_start_marker_yields_nothing() {
        let text = "Only prose here.\nEND OF KEY EVENTS:\n";
        assert!(extract_key_events(text).is_empty());
    }

    #[test]
    fn missing_end_marker_collects_to_the_end() {
        let text = "START OF KEY EVENTS:\nOne\nTwo\n";
        let events = extract_key_events(text);
        assert_eq!(events, vec![KeyEvent::new("One"), KeyEvent::new("Two")]);
    }

    #[test]
    fn custom_markers_are_supported() {
        let markers = EventMarkers {
            start: "BEGIN".into(),
            end: "STOP".into(),
        };
        let events = extract_key_events_with("BEGIN\nA\nSTOP\nB\n", &markers);
        assert_eq!(events, vec![KeyEvent::new("A")]);
    }

    #[test]
    fn chunk_list_partitions_without_gaps() {
        let items: Vec<u32> = (0..12).collect();
        for size in 1..=13 {
            let groups = chunk_list(&items, size).unwrap();
            assert_eq!(groups.len(), items.len().div_ceil(size));
            assert!(groups.iter().all(|group| group.len() <= size));
            let flattened: Vec<u32> = groups.into_iter().flatten().collect();
            assert_eq!(flattened, items);
        }
        assert_eq!(chunk_list(&items, 0), Err(EventError::ZeroBatchSize));
        assert!(chunk_list::<u32>(&[], 3).unwrap().is_empty());
    }

    #[test]
    fn batches_report_ranges_and_bullets() {
        let events = extract_key_events(INSTRUCTIONS);
        let batches = batch_events(&events, 5).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].range_label(), "1-5");
        assert_eq!(batches[1].range_label(), "6-7");
        assert_eq!(batches[1].index(), 1);
        assert_eq!(
            batches[1].bulleted(),
            "- Frodo carries the ring in silence.\n- They reach the doors of Moria."
        );
    }
}
