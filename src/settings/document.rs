use super::{DeviceInfo, DeviceSettings, LogSettings};
use crate::sequence::{decode_sequence, encode_sequence, ActionSequence, SequenceRole};
use crate::utils::xml_tree::XmlNode;
use log::{debug, error, warn};
use std::time::Duration;

const INFO: &str = "info";
const SETTINGS: &str = "settings";
const PERSISTENCE: &str = "device_settings_persistence";
/// Attribute marking a custom-role sequence, so an empty one is still read back
const SEQUENCE_MARK: &str = "sequence";

/// Read a settings document.
///
/// Unknown or unreadable fields are logged and skipped. `serial` is only
/// used to flag a document that belongs to another device.
pub fn from_document(root: &XmlNode, serial: &str) -> DeviceSettings {
    let mut settings = DeviceSettings::default();

    if let Some(info) = root.child(INFO) {
        settings.info = read_info(info);
        if !settings.info.serial.is_empty() && settings.info.serial != serial {
            error!(
                "Settings serial mismatch: document is for {}, device is {}",
                settings.info.serial, serial
            );
        }
    }

    if let Some(section) = root.child(SETTINGS) {
        read_settings(section, &mut settings);
    }

    if let Some(bag) = root.child(PERSISTENCE) {
        for item in &bag.children {
            let value = item.text.clone().unwrap_or_default();
            debug!("Loading persistent setting {} -> {}", item.tag, value);
            settings.persistence.insert(item.tag.clone(), value);
        }
    }

    settings
}

fn read_info(node: &XmlNode) -> DeviceInfo {
    let text = |tag: &str| node.child_text(tag).map(str::to_string);
    DeviceInfo {
        serial: text("serial").unwrap_or_default(),
        manufacturer: text("manufacturer"),
        board: text("board"),
        name: text("name"),
        model: text("model"),
        cpu: text("cpu"),
        screen_resolution: text("screen_resolution"),
        android_version: text("android_version"),
        friendly_name: text("friendly_name"),
    }
}

fn read_settings(section: &XmlNode, settings: &mut DeviceSettings) {
    for elem in &section.children {
        let text = elem.text.as_deref().unwrap_or_default();
        match elem.tag.as_str() {
            "camera_app" => settings.camera_app = text.to_string(),
            "images_save_location" => settings.images_save_location = text.to_string(),
            "logs" => settings.logs = read_logs(elem),
            "actions_time_gap" => match text.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    settings.actions_time_gap = Duration::from_secs_f64(secs)
                }
                _ => error!("Invalid actions_time_gap '{}', keeping default", text),
            },
            tag if tag.parse::<SequenceRole>().is_ok() => {
                settings.set_sequence(tag, decode_sequence(elem));
            }
            tag if elem.attribute(SEQUENCE_MARK).is_some() || elem.child("action").is_some() => {
                debug!("Keeping sequence for unknown role '{}'", tag);
                settings.set_sequence(tag, decode_sequence(elem));
            }
            tag => warn!("Ignoring unknown setting <{}>", tag),
        }
    }
}

fn read_logs(node: &XmlNode) -> LogSettings {
    LogSettings {
        enabled: node.child_text("enabled").map(str::trim) == Some("1"),
        filter: node.child_text("filter").unwrap_or_default().to_string(),
    }
}

/// Build the full document. Every known role is written, empty or not.
pub fn to_document(settings: &DeviceSettings) -> XmlNode {
    let mut root = XmlNode::new("device");
    root.push(write_info(&settings.info));

    let section = root.push(XmlNode::new(SETTINGS));
    section.push(XmlNode::with_text("camera_app", settings.camera_app.as_str()));
    section.push(XmlNode::with_text(
        "images_save_location",
        settings.images_save_location.as_str(),
    ));
    let logs = section.push(XmlNode::new("logs"));
    logs.push(XmlNode::with_text(
        "enabled",
        if settings.logs.enabled { "1" } else { "0" },
    ));
    logs.push(XmlNode::with_text("filter", settings.logs.filter.as_str()));

    let empty = ActionSequence::default();
    for role in SequenceRole::ALL {
        let sequence = settings.sequences.get(role.as_str()).unwrap_or(&empty);
        section.push(encode_sequence(role.as_str(), sequence));
    }
    for (name, sequence) in &settings.sequences {
        if name.parse::<SequenceRole>().is_err() {
            section
                .push(encode_sequence(name, sequence))
                .set_attribute(SEQUENCE_MARK, "1");
        }
    }

    section.push(XmlNode::with_text(
        "actions_time_gap",
        format_seconds(settings.actions_time_gap),
    ));

    let bag = root.push(XmlNode::new(PERSISTENCE));
    for (key, value) in &settings.persistence {
        bag.push(XmlNode::with_text(key.as_str(), value.as_str()));
    }

    root
}

fn write_info(info: &DeviceInfo) -> XmlNode {
    let mut node = XmlNode::new(INFO);
    let fields: [(&str, Option<&str>); 9] = [
        ("serial", Some(info.serial.as_str())),
        ("manufacturer", info.manufacturer.as_deref()),
        ("board", info.board.as_deref()),
        ("name", info.name.as_deref()),
        ("model", info.model.as_deref()),
        ("cpu", info.cpu.as_deref()),
        ("screen_resolution", info.screen_resolution.as_deref()),
        ("android_version", info.android_version.as_deref()),
        ("friendly_name", info.friendly_name.as_deref()),
    ];
    for (tag, value) in fields {
        node.push(XmlNode::with_text(tag, value.unwrap_or_default()));
    }
    node
}

fn format_seconds(gap: Duration) -> String {
    if gap.subsec_nanos() == 0 {
        gap.as_secs().to_string()
    } else {
        gap.as_secs_f64().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Action;
    use crate::utils::xml_tree;

    fn sample() -> DeviceSettings {
        let mut settings = DeviceSettings {
            camera_app: "com.android.camera".into(),
            images_save_location: "/sdcard/DCIM/Camera".into(),
            logs: LogSettings {
                enabled: true,
                filter: "CameraService:V *:S".into(),
            },
            actions_time_gap: Duration::from_millis(1500),
            ..Default::default()
        };
        settings.info.serial = "R58M123".into();
        settings.info.model = Some("SM-G991B".into());
        settings.set_sequence(
            "photo",
            ActionSequence::new(vec![Action::tap("shutter", "Shutter", 540, 1820)]),
        );
        settings.set_sequence(
            "burst",
            ActionSequence::new(vec![Action::delay("hold", "", 3)]),
        );
        settings.set_persist_setting("last_export", "/tmp/out");
        settings
    }

    #[test]
    fn test_document_round_trip() {
        let settings = sample();
        let xml = xml_tree::to_string(&to_document(&settings)).unwrap();
        let loaded = from_document(&xml_tree::parse(&xml).unwrap(), "R58M123");

        assert_eq!(loaded.camera_app, settings.camera_app);
        assert_eq!(loaded.images_save_location, settings.images_save_location);
        assert_eq!(loaded.logs, settings.logs);
        assert_eq!(loaded.actions_time_gap, settings.actions_time_gap);
        assert_eq!(loaded.persistence, settings.persistence);
        assert_eq!(loaded.info.model.as_deref(), Some("SM-G991B"));
        assert_eq!(loaded.sequences.get("photo"), settings.sequences.get("photo"));
    }

    #[test]
    fn test_unknown_role_survives_round_trip() {
        let mut settings = sample();
        settings.set_sequence("timelapse", ActionSequence::default());
        let doc = to_document(&settings);

        let loaded = from_document(&doc, "R58M123");
        assert_eq!(loaded.sequences.get("burst"), settings.sequences.get("burst"));
        assert_eq!(loaded.sequences.get("timelapse"), Some(&ActionSequence::default()));

        let xml = xml_tree::to_string(&doc).unwrap();
        let reread = from_document(&xml_tree::parse(&xml).unwrap(), "R58M123");
        assert_eq!(reread.sequences.get("timelapse"), Some(&ActionSequence::default()));
        assert_eq!(reread.sequences.get("burst"), settings.sequences.get("burst"));
    }

    #[test]
    fn test_unmarked_empty_element_is_not_a_sequence() {
        let xml = "<device><settings><flash_mode/></settings></device>";
        let loaded = from_document(&xml_tree::parse(xml).unwrap(), "x");
        assert!(!loaded.sequences.contains_key("flash_mode"));
    }

    #[test]
    fn test_every_known_role_is_written() {
        let doc = to_document(&DeviceSettings::default());
        let section = doc.child("settings").unwrap();
        for role in SequenceRole::ALL {
            assert!(section.child(role.as_str()).is_some(), "{}", role);
        }
    }

    #[test]
    fn test_bad_gap_keeps_default() {
        let xml = "<device><settings><actions_time_gap>soon</actions_time_gap></settings></device>";
        let loaded = from_document(&xml_tree::parse(xml).unwrap(), "x");
        assert_eq!(loaded.actions_time_gap, Duration::from_secs(1));
    }

    #[test]
    fn test_integer_gap_is_written_without_fraction() {
        assert_eq!(format_seconds(Duration::from_secs(2)), "2");
        assert_eq!(format_seconds(Duration::from_millis(1500)), "1.5");
    }

    #[test]
    fn test_logs_disabled_unless_one() {
        let xml = "<device><settings><logs><enabled>true</enabled></logs></settings></device>";
        let loaded = from_document(&xml_tree::parse(xml).unwrap(), "x");
        assert!(!loaded.logs.enabled);
        assert_eq!(loaded.logs.filter, "");
    }
}
