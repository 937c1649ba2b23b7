//! UI hierarchy dumps
//!
//! `uiautomator dump` writes the current view tree on the device. The dump
//! is pulled next to the other dumps and reduced to the clickable elements,
//! which is what sequence recording works from.

use quick_xml::events::Event;
use quick_xml::Reader;

/// On-device location `uiautomator dump` writes to by default
pub const DEFAULT_DUMP_PATH: &str = "/sdcard/window_dump.xml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    /// Parse bounds from string like "[0,0][1080,1920]"
    pub fn from_string(s: &str) -> Option<Self> {
        let (left_top, right_bottom) = s.trim().split_once("][")?;
        let pair = |part: &str| -> Option<(i32, i32)> {
            let (a, b) = part.split_once(',')?;
            Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
        };

        let (left, top) = pair(left_top.trim_start_matches('['))?;
        let (right, bottom) = pair(right_bottom.trim_end_matches(']'))?;
        Some(Bounds {
            left,
            top,
            right,
            bottom,
        })
    }
}

/// Clickable node of a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickableElement {
    pub index: usize,
    pub resource_id: String,
    pub content_desc: String,
    pub text: String,
    pub bounds: Bounds,
}

impl ClickableElement {
    /// Short name: resource id without its package, else the description
    pub fn key(&self) -> String {
        let id = self
            .resource_id
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.resource_id);
        if !id.is_empty() {
            id.to_string()
        } else if !self.content_desc.is_empty() {
            self.content_desc.clone()
        } else {
            self.index.to_string()
        }
    }

    pub fn tap_point(&self) -> (i32, i32) {
        self.bounds.center()
    }
}

/// Extract the device path from `uiautomator dump` output.
///
/// Returns `None` when the dump failed, most often "null root node" while
/// the screen is off or an animation is running.
pub fn dump_location(output: &str) -> Option<&str> {
    if output.contains("ERROR") || output.contains("null root node") {
        return None;
    }
    let (_, path) = output.trim().rsplit_once(": ")?;
    let path = path.trim();
    path.starts_with('/').then_some(path)
}

/// Local file name for a dump taken while `package/activity` was in front
pub fn dump_file_name(serial: &str, package: &str, activity: &str) -> String {
    let activity = activity.trim_start_matches('.').replace('/', "_");
    format!("{}_{}_{}.xml", serial, package, activity)
}

/// Collect every clickable `node` in document order
pub fn parse_clickable(xml: &str) -> Result<Vec<ClickableElement>, quick_xml::Error> {
    let mut elements = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut index = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"node" => {
                let mut clickable = false;
                let mut element = ClickableElement {
                    index,
                    resource_id: String::new(),
                    content_desc: String::new(),
                    text: String::new(),
                    bounds: Bounds::default(),
                };
                index += 1;

                for attr in e.attributes().filter_map(|a| a.ok()) {
                    let value = attr.unescape_value()?.into_owned();
                    match attr.key.as_ref() {
                        b"resource-id" => element.resource_id = value,
                        b"content-desc" => element.content_desc = value,
                        b"text" => element.text = value,
                        b"clickable" => clickable = value == "true",
                        b"bounds" => {
                            if let Some(b) = Bounds::from_string(&value) {
                                element.bounds = b;
                            }
                        }
                        _ => {}
                    }
                }

                if clickable {
                    elements.push(element);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" clickable="false" bounds="[0,0][1080,2400]">
    <node index="0" text="" resource-id="com.android.camera:id/shutter_button" content-desc="Shutter" clickable="true" bounds="[440,2000][640,2200]" />
    <node index="1" text="VIDEO" resource-id="" content-desc="Video &amp; slow-mo" clickable="true" bounds="[700,1800][900,1860]" />
    <node index="2" text="" resource-id="" content-desc="" clickable="true" bounds="[0,0][100,100]" />
  </node>
</hierarchy>"#;

    #[test]
    fn test_bounds_parsing() {
        let b = Bounds::from_string("[10,20][110,220]").unwrap();
        assert_eq!(b.center(), (60, 120));
        assert!(Bounds::from_string("[10,20]").is_none());
        assert!(Bounds::from_string("[a,b][c,d]").is_none());
    }

    #[test]
    fn test_only_clickable_nodes_are_kept() {
        let elements = parse_clickable(DUMP).unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].key(), "shutter_button");
        assert_eq!(elements[0].tap_point(), (540, 2100));
        assert_eq!(elements[1].content_desc, "Video & slow-mo");
        assert_eq!(elements[1].key(), "Video & slow-mo");
        // anonymous nodes fall back to their position in the dump
        assert_eq!(elements[2].key(), "3");
    }

    #[test]
    fn test_dump_location() {
        assert_eq!(
            dump_location("UI hierchary dumped to: /sdcard/window_dump.xml\n"),
            Some("/sdcard/window_dump.xml")
        );
        assert_eq!(
            dump_location("ERROR: null root node returned by UiTestAutomationBridge."),
            None
        );
        assert_eq!(dump_location(""), None);
    }

    #[test]
    fn test_dump_file_name() {
        assert_eq!(
            dump_file_name("R58", "com.android.camera", ".CameraActivity"),
            "R58_com.android.camera_CameraActivity.xml"
        );
    }
}
