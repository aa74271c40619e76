use crate::types::{PendingConfig, TrackerModel};

/// Liveness/position probe command for a model, if it is commanded over SMS.
/// Polled models are probed by fetching their feed instead.
pub fn probe_command(model: &TrackerModel, device_id: &str) -> Option<String> {
    match model {
        TrackerModel::Tk102b => Some("check123456".to_string()),
        // Suntech devices use the same AT^ frame family as the TCP ACK.
        TrackerModel::St940 => Some(format!("AT^ST910;STT;{device_id}")),
        TrackerModel::SpotTrace | TrackerModel::Other(_) => None,
    }
}

/// SMS command applying a named configuration, per the model's fixed command
/// vocabulary. Returns `None` when the model (or the configuration name) has
/// no command form.
pub fn config_command(model: &TrackerModel, config: &PendingConfig) -> Option<String> {
    match model {
        TrackerModel::Tk102b => match config.name.as_str() {
            "MoveOut" => Some(format!("move123456 {}", config.value)),
            "OverSpeed" => Some(format!("speed123456 {}", config.value)),
            "PeriodicUpdate" => Some(format!("t{}s***n123456", config.value)),
            "Shock" => Some("shock123456".to_string()),
            "StatusCheck" => Some("check123456".to_string()),
            _ => None,
        },
        TrackerModel::St940 => {
            if config.value.is_empty() {
                Some(format!("AT^ST910;{}", config.name))
            } else {
                Some(format!("AT^ST910;{};{}", config.name, config.value))
            }
        }
        TrackerModel::SpotTrace | TrackerModel::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfigStatus, ConfigStep};

    fn config(name: &str, value: &str) -> PendingConfig {
        PendingConfig {
            name: name.to_string(),
            value: value.to_string(),
            status: ConfigStatus {
                step: ConfigStep::Requested,
                in_progress: false,
                owner: None,
                attempts: 0,
                updated_at: None,
            },
        }
    }

    #[test]
    fn test_tk102_probe_literal() {
        assert_eq!(
            probe_command(&TrackerModel::Tk102b, "11987654321").as_deref(),
            Some("check123456")
        );
    }

    #[test]
    fn test_suntech_probe_uses_at_frame() {
        assert_eq!(
            probe_command(&TrackerModel::St940, "696478").as_deref(),
            Some("AT^ST910;STT;696478")
        );
    }

    #[test]
    fn test_polled_model_has_no_probe_command() {
        assert_eq!(probe_command(&TrackerModel::SpotTrace, "abc"), None);
    }

    #[test]
    fn test_tk102_config_vocabulary() {
        let model = TrackerModel::Tk102b;
        assert_eq!(
            config_command(&model, &config("MoveOut", "on")).as_deref(),
            Some("move123456 on")
        );
        assert_eq!(
            config_command(&model, &config("OverSpeed", "080")).as_deref(),
            Some("speed123456 080")
        );
        assert_eq!(
            config_command(&model, &config("PeriodicUpdate", "030")).as_deref(),
            Some("t030s***n123456")
        );
        assert_eq!(
            config_command(&model, &config("Shock", "")).as_deref(),
            Some("shock123456")
        );
        assert_eq!(
            config_command(&model, &config("StatusCheck", "")).as_deref(),
            Some("check123456")
        );
        assert_eq!(config_command(&model, &config("Unknown", "1")), None);
    }

    #[test]
    fn test_suntech_config_command() {
        assert_eq!(
            config_command(&TrackerModel::St940, &config("PeriodicUpdate", "60")).as_deref(),
            Some("AT^ST910;PeriodicUpdate;60")
        );
        assert_eq!(
            config_command(&TrackerModel::St940, &config("Reboot", "")).as_deref(),
            Some("AT^ST910;Reboot")
        );
    }
}
