use crate::gallery::GalleryMatch;
use crate::registry::{PassengerRecord, PassengerRegistry};
use crate::Error;
use crate::Recognizer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Announcements produced by the continuous watch loop
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A passenger different from the last announced one was matched
    PassengerIdentified {
        name: String,
        similarity: f32,
        record: Option<PassengerRecord>,
    },
    /// A frame yielded no passenger match after one had been announced
    PassengerLost,
    /// A watchlist identity different from the last announced one was matched
    WatchlistHit { name: String, similarity: f32 },
    /// A frame yielded no watchlist match after a hit had been announced
    WatchlistCleared,
}

/// Transition reported by a tracker when the sighted identity changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    New(String),
    Cleared,
}

/// Equality-based de-duplication of per-frame sightings. Announces an
/// identity only when it differs from the last announced one, and resets
/// once a frame yields no match. Repeated identical sightings produce
/// exactly one announcement.
#[derive(Debug, Default)]
pub struct SightingTracker {
    last: Option<String>,
}

impl SightingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame's result for this category.
    pub fn update(&mut self, sighted: Option<&str>) -> Option<Transition> {
        match (sighted, self.last.as_deref()) {
            (Some(name), Some(last)) if name == last => None,
            (Some(name), _) => {
                self.last = Some(name.to_string());
                Some(Transition::New(name.to_string()))
            }
            (None, Some(_)) => {
                self.last = None;
                Some(Transition::Cleared)
            }
            (None, None) => None,
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

/// What one frame of the loop yielded. A frame with no detectable face
/// is a per-frame condition that leaves the trackers untouched, the same
/// as a recognition failure; only a frame with a face resets them.
enum FrameObservation {
    NoFace,
    Face {
        passenger: Option<GalleryMatch>,
        watchlisted: Option<GalleryMatch>,
    },
}

/// Run the continuous recognition loop until `stop` is set or the camera
/// stops yielding frames. One frame per iteration: embed the best face,
/// query both galleries, feed the trackers, sleep the configured delay.
/// Per-frame recognition failures are logged and swallowed; capture
/// failures abort the session.
pub fn run<F>(
    recognizer: &mut Recognizer,
    registry: &PassengerRegistry,
    stop: &AtomicBool,
    mut on_event: F,
) -> Result<(), Error>
where
    F: FnMut(WatchEvent),
{
    let threshold = recognizer.config().matching.threshold;
    let delay = Duration::from_millis(recognizer.config().watch.frame_delay_ms);

    let mut passenger_tracker = SightingTracker::new();
    let mut watchlist_tracker = SightingTracker::new();

    log::info!("Starting live recognition loop");

    while !stop.load(Ordering::SeqCst) {
        let frame = recognizer.capture_frame()?;

        match recognizer.embed_frame(&frame) {
            Ok(Some((_, embedding))) => {
                let observation = FrameObservation::Face {
                    passenger: recognizer.passengers().find_match(&embedding, threshold),
                    watchlisted: recognizer.watchlist().find_match(&embedding, threshold),
                };
                observe(
                    observation,
                    &mut passenger_tracker,
                    &mut watchlist_tracker,
                    registry,
                    &mut on_event,
                );
            }
            Ok(None) => {
                observe(
                    FrameObservation::NoFace,
                    &mut passenger_tracker,
                    &mut watchlist_tracker,
                    registry,
                    &mut on_event,
                );
            }
            Err(e) => {
                log::warn!("Recognition failed for frame: {}", e);
            }
        }

        std::thread::sleep(delay);
    }

    log::info!("Live recognition loop stopped");
    Ok(())
}

/// Feed one frame's observation to the trackers and emit announcements.
fn observe<F>(
    observation: FrameObservation,
    passenger_tracker: &mut SightingTracker,
    watchlist_tracker: &mut SightingTracker,
    registry: &PassengerRegistry,
    on_event: &mut F,
) where
    F: FnMut(WatchEvent),
{
    let (passenger, watchlisted) = match observation {
        FrameObservation::NoFace => {
            log::debug!("No face in frame");
            return;
        }
        FrameObservation::Face {
            passenger,
            watchlisted,
        } => (passenger, watchlisted),
    };

    match passenger_tracker.update(passenger.as_ref().map(|m| m.identity.as_str())) {
        Some(Transition::New(name)) => {
            let similarity = passenger.as_ref().map(|m| m.similarity).unwrap_or(0.0);
            let record = lookup_record(registry, &name);
            on_event(WatchEvent::PassengerIdentified {
                name,
                similarity,
                record,
            });
        }
        Some(Transition::Cleared) => on_event(WatchEvent::PassengerLost),
        None => {}
    }

    match watchlist_tracker.update(watchlisted.as_ref().map(|m| m.identity.as_str())) {
        Some(Transition::New(name)) => {
            let similarity = watchlisted.as_ref().map(|m| m.similarity).unwrap_or(0.0);
            on_event(WatchEvent::WatchlistHit { name, similarity });
        }
        Some(Transition::Cleared) => on_event(WatchEvent::WatchlistCleared),
        None => {}
    }
}

/// Registry lookup for an announcement. Lookup failures degrade to "no
/// additional information" rather than ending the loop.
///
/// Announcements carry gallery identities (sanitized filename stems,
/// e.g. `Jane_Doe`) while registry keys are raw display names
/// (`Jane Doe`), so a display name that needed sanitizing does not
/// resolve here. That mismatch is part of the on-disk format this tool
/// shares with its registry files; changing either side alone would
/// break existing data.
fn lookup_record(registry: &PassengerRegistry, name: &str) -> Option<PassengerRecord> {
    match registry.get(name) {
        Ok(record) => record,
        Err(e) => {
            log::warn!("Failed to read passenger registry: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrationFields;

    fn sighting(identity: &str) -> Option<GalleryMatch> {
        Some(GalleryMatch {
            identity: identity.to_string(),
            similarity: 0.9,
        })
    }

    fn collect_events(
        observations: Vec<FrameObservation>,
        registry: &PassengerRegistry,
    ) -> Vec<WatchEvent> {
        let mut passenger_tracker = SightingTracker::new();
        let mut watchlist_tracker = SightingTracker::new();
        let mut events = Vec::new();
        for observation in observations {
            observe(
                observation,
                &mut passenger_tracker,
                &mut watchlist_tracker,
                registry,
                &mut |event| events.push(event),
            );
        }
        events
    }

    fn empty_registry(dir: &std::path::Path) -> PassengerRegistry {
        PassengerRegistry::new(dir.join("passenger_data.json"), dir.join("known_faces"))
    }

    #[test]
    fn test_no_face_frame_leaves_trackers_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let registry = empty_registry(dir.path());

        let events = collect_events(
            vec![
                FrameObservation::Face {
                    passenger: sighting("Jane_Doe"),
                    watchlisted: None,
                },
                FrameObservation::NoFace,
                FrameObservation::NoFace,
                FrameObservation::Face {
                    passenger: sighting("Jane_Doe"),
                    watchlisted: None,
                },
            ],
            &registry,
        );

        // One announcement, no lost/re-identified pair around the
        // no-face frames
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            WatchEvent::PassengerIdentified { name, .. } if name == "Jane_Doe"
        ));
    }

    #[test]
    fn test_face_without_match_clears() {
        let dir = tempfile::tempdir().unwrap();
        let registry = empty_registry(dir.path());

        let events = collect_events(
            vec![
                FrameObservation::Face {
                    passenger: sighting("Jane_Doe"),
                    watchlisted: None,
                },
                FrameObservation::Face {
                    passenger: None,
                    watchlisted: None,
                },
            ],
            &registry,
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], WatchEvent::PassengerLost));
    }

    #[test]
    fn test_watchlist_hit_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let registry = empty_registry(dir.path());

        let events = collect_events(
            vec![
                FrameObservation::Face {
                    passenger: None,
                    watchlisted: sighting("Flagged_Person"),
                },
                FrameObservation::NoFace,
                FrameObservation::Face {
                    passenger: None,
                    watchlisted: None,
                },
            ],
            &registry,
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            WatchEvent::WatchlistHit { name, .. } if name == "Flagged_Person"
        ));
        assert!(matches!(&events[1], WatchEvent::WatchlistCleared));
    }

    #[test]
    fn test_announcement_key_is_gallery_identity_not_display_name() {
        // Registry keys are raw display names; announcements carry the
        // sanitized gallery identity. The two only coincide when the
        // display name needed no sanitizing.
        let dir = tempfile::tempdir().unwrap();
        let registry = empty_registry(dir.path());
        let image = dir.path().join("upload.jpg");
        std::fs::write(&image, b"jpeg-bytes").unwrap();

        registry
            .register(
                "Jane Doe",
                RegistrationFields {
                    origin: "London",
                    destination: "Tokyo",
                    contact: "+44 1234 567890",
                    email: "jane@example.com",
                },
                &image,
            )
            .unwrap();

        assert!(lookup_record(&registry, "Jane_Doe").is_none());
        assert!(lookup_record(&registry, "Jane Doe").is_some());
    }

    #[test]
    fn test_same_identity_announced_once() {
        let mut tracker = SightingTracker::new();

        assert_eq!(
            tracker.update(Some("Jane_Doe")),
            Some(Transition::New("Jane_Doe".to_string()))
        );
        assert_eq!(tracker.update(Some("Jane_Doe")), None);
        assert_eq!(tracker.update(Some("Jane_Doe")), None);
        assert_eq!(tracker.last(), Some("Jane_Doe"));
    }

    #[test]
    fn test_clears_once_then_stays_quiet() {
        let mut tracker = SightingTracker::new();

        tracker.update(Some("Jane_Doe"));
        assert_eq!(tracker.update(None), Some(Transition::Cleared));
        assert_eq!(tracker.update(None), None);
        assert_eq!(tracker.last(), None);
    }

    #[test]
    fn test_no_match_without_prior_sighting_is_silent() {
        let mut tracker = SightingTracker::new();
        assert_eq!(tracker.update(None), None);
    }

    #[test]
    fn test_identity_change_announces_immediately() {
        let mut tracker = SightingTracker::new();

        tracker.update(Some("Jane_Doe"));
        assert_eq!(
            tracker.update(Some("John_Smith")),
            Some(Transition::New("John_Smith".to_string()))
        );
    }

    #[test]
    fn test_reappearance_after_clear_is_announced() {
        let mut tracker = SightingTracker::new();

        tracker.update(Some("Jane_Doe"));
        tracker.update(None);
        assert_eq!(
            tracker.update(Some("Jane_Doe")),
            Some(Transition::New("Jane_Doe".to_string()))
        );
    }
}
