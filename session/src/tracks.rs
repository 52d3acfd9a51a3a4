//! Mapping of audio and subtitle stream selections into the flat track index
//! space of the media engine.
//!
//! The engine enumerates tracks as one video track, then every audio track,
//! then the embedded subtitles followed by the external ones. Embedded streams
//! already carry the index the engine uses for them. External streams are
//! appended by the engine after all embedded tracks, so their server index has
//! to be remapped.

use crate::{
    error::{SessionError, SessionResult},
    item::MediaStream,
};

/// Engine index that turns subtitle rendering off.
pub const SUBTITLES_OFF: i32 = -1;

const VIDEO_TRACKS: usize = 1;

/// Logical selection, positions into the item's ordered stream lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackSelection {
    pub audio: Option<usize>,
    pub subtitle: Option<usize>,
}

/// `selection` is the server index of a subtitle stream, or [`SUBTITLES_OFF`].
pub fn resolve_subtitle(
    audio_count: usize,
    subtitles: &[MediaStream],
    selection: i32,
) -> SessionResult<i32> {
    if selection == SUBTITLES_OFF {
        return Ok(SUBTITLES_OFF);
    }

    let (external, embedded): (Vec<&MediaStream>, Vec<&MediaStream>) =
        subtitles.iter().partition(|s| s.external);

    if let Some(external_index) = external.iter().position(|s| s.index == selection) {
        let composite = VIDEO_TRACKS + audio_count + embedded.len() + external_index;
        return i32::try_from(composite).map_err(|_| {
            SessionError::InvalidTrackSelection(format!(
                "composite index {composite} does not fit the engine"
            ))
        });
    }

    if embedded.iter().any(|s| s.index == selection) {
        return Ok(selection);
    }

    Err(SessionError::InvalidTrackSelection(format!(
        "no subtitle stream with index {selection}"
    )))
}

/// Resolves a logical subtitle position, `None` meaning off.
pub fn subtitle_engine_index(
    audio_count: usize,
    subtitles: &[MediaStream],
    logical: Option<usize>,
) -> SessionResult<i32> {
    let selection = match logical {
        None => SUBTITLES_OFF,
        Some(i) => subtitles.get(i).map(|s| s.index).ok_or_else(|| {
            SessionError::InvalidTrackSelection(format!(
                "subtitle {i} out of range of 0..{}",
                subtitles.len()
            ))
        })?,
    };
    resolve_subtitle(audio_count, subtitles, selection)
}

pub fn audio_engine_index(audios: &[MediaStream], logical: usize) -> SessionResult<i32> {
    audios.get(logical).map(|s| s.index).ok_or_else(|| {
        SessionError::InvalidTrackSelection(format!(
            "audio {logical} out of range of 0..{}",
            audios.len()
        ))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    // Server numbering: video 0, then audio, then embedded and external subtitles.
    fn layout(
        audio: usize,
        embedded: usize,
        external: usize,
    ) -> (Vec<MediaStream>, Vec<MediaStream>) {
        let audios = (0..audio)
            .map(|i| MediaStream::embedded(1 + i as i32, format!("audio {i}")))
            .collect();
        let first_sub = 1 + audio;
        let subs = (0..embedded)
            .map(|i| MediaStream::embedded((first_sub + i) as i32, format!("sub {i}")))
            .chain((0..external).map(|j| {
                MediaStream::external((first_sub + embedded + j) as i32, format!("ext {j}"))
            }))
            .collect();
        (audios, subs)
    }

    #[test]
    fn scenario_external_subtitle() {
        let (audios, subs) = layout(2, 3, 2);
        let selection = subs.iter().filter(|s| s.external).nth(1).unwrap().index;
        assert_eq!(Ok(1 + 2 + 3 + 1), resolve_subtitle(audios.len(), &subs, selection));
        assert_eq!(Ok(7), subtitle_engine_index(audios.len(), &subs, Some(4)));
    }

    #[test]
    fn all_layouts() {
        for a in 0..4 {
            for e in 0..4 {
                for x in 0..4 {
                    let (_, subs) = layout(a, e, x);
                    for s in subs.iter().filter(|s| !s.external) {
                        assert_eq!(Ok(s.index), resolve_subtitle(a, &subs, s.index));
                    }
                    for (j, s) in subs.iter().filter(|s| s.external).enumerate() {
                        assert_eq!(
                            Ok((1 + a + e + j) as i32),
                            resolve_subtitle(a, &subs, s.index)
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn sparse_server_indexes() {
        let subs = vec![
            MediaStream::external(14, "forced"),
            MediaStream::embedded(3, "eng"),
            MediaStream::external(12, "sdh"),
        ];
        assert_eq!(Ok(1 + 1 + 1), resolve_subtitle(1, &subs, 14));
        assert_eq!(Ok(1 + 1 + 1 + 1), resolve_subtitle(1, &subs, 12));
        assert_eq!(Ok(3), resolve_subtitle(1, &subs, 3));
    }

    #[test]
    fn off_bypasses_remap() {
        assert_eq!(Ok(SUBTITLES_OFF), resolve_subtitle(5, &[], SUBTITLES_OFF));
        let (_, subs) = layout(1, 1, 1);
        assert_eq!(Ok(SUBTITLES_OFF), subtitle_engine_index(1, &subs, None));
    }

    #[test]
    fn recomputed_for_other_layouts() {
        let (_, subs) = layout(2, 1, 1);
        let ext = subs[1].index;
        assert_eq!(Ok(4), resolve_subtitle(2, &subs, ext));
        assert_eq!(Ok(6), resolve_subtitle(4, &subs, ext));
    }

    #[test]
    fn invalid_selections_fail() {
        let (audios, subs) = layout(2, 1, 1);
        assert!(matches!(
            resolve_subtitle(2, &subs, 42),
            Err(SessionError::InvalidTrackSelection(_))
        ));
        assert!(matches!(
            resolve_subtitle(2, &subs, -2),
            Err(SessionError::InvalidTrackSelection(_))
        ));
        assert!(matches!(
            subtitle_engine_index(2, &subs, Some(2)),
            Err(SessionError::InvalidTrackSelection(_))
        ));
        assert!(matches!(
            audio_engine_index(&audios, 2),
            Err(SessionError::InvalidTrackSelection(_))
        ));
        assert_eq!(Ok(2), audio_engine_index(&audios, 1));
    }
}
