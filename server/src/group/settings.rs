//! Group settings with construction-time clamping.

use gv_protocol::messages::GroupSettingsData;

/// Per-group tuning. Out-of-range inputs are clamped, never rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSettings {
    /// Baseline playback volume in percent, 0..=200.
    pub default_volume: u32,
    /// Audible range between group members, meters.
    pub proximity_range: f64,
    /// Whether members may invite outsiders.
    pub allow_invites: bool,
    /// Membership cap, at least 2.
    pub max_members: u32,
}

impl GroupSettings {
    pub const MIN_MEMBERS: u32 = 2;
    pub const MAX_VOLUME: u32 = 200;

    /// Build settings from wire data, clamping against server limits.
    #[must_use]
    pub fn from_wire(
        data: &GroupSettingsData,
        default_range: f64,
        max_range: f64,
        default_max_members: u32,
    ) -> Self {
        let proximity_range = data
            .proximity_range
            .unwrap_or(default_range)
            .clamp(f64::MIN_POSITIVE, max_range);
        Self {
            default_volume: data.default_volume.unwrap_or(100).min(Self::MAX_VOLUME),
            proximity_range,
            allow_invites: data.allow_invites.unwrap_or(true),
            max_members: data.max_members.unwrap_or(default_max_members).max(Self::MIN_MEMBERS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_values() {
        let data = GroupSettingsData {
            max_members: Some(1),
            proximity_range: Some(-5.0),
            default_volume: Some(900),
            allow_invites: None,
        };
        let settings = GroupSettings::from_wire(&data, 30.0, 128.0, 16);
        assert_eq!(settings.max_members, 2);
        assert!(settings.proximity_range > 0.0);
        assert_eq!(settings.default_volume, 200);
        assert!(settings.allow_invites);
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let settings = GroupSettings::from_wire(&GroupSettingsData::default(), 30.0, 128.0, 16);
        assert_eq!(settings.max_members, 16);
        assert!((settings.proximity_range - 30.0).abs() < f64::EPSILON);
        assert_eq!(settings.default_volume, 100);
    }

    #[test]
    fn range_clamped_to_server_max() {
        let data = GroupSettingsData {
            proximity_range: Some(10_000.0),
            ..GroupSettingsData::default()
        };
        let settings = GroupSettings::from_wire(&data, 30.0, 128.0, 16);
        assert!((settings.proximity_range - 128.0).abs() < f64::EPSILON);
    }
}
