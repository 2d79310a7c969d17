//! Replay-gain selection for window entries.

use cadence_core::LibraryTrack;

/// Gain applied on top of every replay-gain value.
pub const DEFAULT_PREAMP: f64 = 0.75;
/// Multiplier used when a track carries no replay-gain data.
pub const DEFAULT_GAIN: f64 = 0.25;

/// Replay-gain tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainConfig {
    pub preamp: f64,
    pub default_gain: f64,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            preamp: DEFAULT_PREAMP,
            default_gain: DEFAULT_GAIN,
        }
    }
}

/// Convert decibels to a linear multiplier.
pub fn db_to_float(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Gain multiplier and peak for `track` given its logical neighbours.
///
/// Album gain is used only when a neighbour is a verifiable album
/// neighbour: same album key and a track number exactly one apart. Disc
/// numbers are not consulted.
pub fn gain_and_peak(
    config: &GainConfig,
    prev: Option<&LibraryTrack>,
    track: &LibraryTrack,
    next: Option<&LibraryTrack>,
) -> (f64, f64) {
    let album_mode = prev.is_some_and(|prev| track.is_album_neighbor(prev, -1))
        || next.is_some_and(|next| track.is_album_neighbor(next, 1));

    let rg = &track.replay_gain;
    let selected = match (album_mode, rg.album_gain, rg.track_gain) {
        (true, Some(gain), _) => Some((gain, rg.album_peak)),
        (_, _, Some(gain)) => Some((gain, rg.track_peak)),
        _ => None,
    };

    match selected {
        Some((gain, peak)) => (config.preamp * db_to_float(gain), peak.unwrap_or(1.0)),
        None => (config.preamp * config.default_gain, 1.0),
    }
}
