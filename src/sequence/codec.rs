//! Tree form of action sequences
//!
//! ```xml
//! <photo>
//!   <action type="tap">
//!     <id>shutter_button</id>
//!     <description>Shutter</description>
//!     <coordinates><x>540</x><y>1820</y></coordinates>
//!   </action>
//!   <action type="delay">
//!     <id>settle</id>
//!     <description></description>
//!     <value>2</value>
//!   </action>
//! </photo>
//! ```
//!
//! Decoding is lenient: a missing or unreadable field is logged and left at
//! its default, the rest of the sequence still loads.

use super::{Action, ActionKind, ActionSequence};
use crate::utils::xml_tree::XmlNode;
use log::{debug, error};

/// Encode a sequence as an element named after its role
pub fn encode_sequence(role: &str, sequence: &ActionSequence) -> XmlNode {
    let mut node = XmlNode::new(role);
    for action in sequence.iter() {
        node.push(encode_action(action));
    }
    node
}

fn encode_action(action: &Action) -> XmlNode {
    let mut elem = XmlNode::new("action");
    elem.set_attribute("type", action.kind.type_name());
    elem.push(XmlNode::with_text("id", action.id.as_str()));
    elem.push(XmlNode::with_text(
        "description",
        action.description.as_str(),
    ));

    match &action.kind {
        ActionKind::Tap { x, y } => {
            let coords = elem.push(XmlNode::new("coordinates"));
            coords.push(XmlNode::with_text("x", x.to_string()));
            coords.push(XmlNode::with_text("y", y.to_string()));
        }
        ActionKind::Delay { seconds: value } | ActionKind::Value { value, .. } => {
            elem.push(XmlNode::with_text("value", value.as_str()));
        }
    }
    elem
}

/// Decode every `<action>` child of a role element, in document order
pub fn decode_sequence(node: &XmlNode) -> ActionSequence {
    debug!("Decoding sequence '{}'", node.tag);
    let actions = node
        .children
        .iter()
        .filter(|c| c.tag == "action")
        .enumerate()
        .map(|(index, elem)| decode_action(&node.tag, index, elem))
        .collect();
    ActionSequence::new(actions)
}

fn decode_action(role: &str, index: usize, elem: &XmlNode) -> Action {
    let id = match elem.child("id") {
        Some(id) => id.text.clone().unwrap_or_default(),
        None => {
            error!("{} action #{} has no <id>", role, index);
            String::new()
        }
    };
    let description = elem
        .child_text("description")
        .unwrap_or_default()
        .to_string();

    let type_name = elem.attribute("type");
    if type_name.is_none() {
        error!("{} action #{} has no type attribute", role, index);
    }

    let coordinates = elem.child("coordinates");
    let is_tap = match type_name {
        Some(t) => t == "tap",
        None => coordinates.is_some(),
    };

    let kind = if is_tap {
        let (x, y) = match coordinates {
            Some(coords) => (
                coordinate(role, index, coords, "x"),
                coordinate(role, index, coords, "y"),
            ),
            None => {
                error!("{} tap action #{} has no <coordinates>", role, index);
                (0, 0)
            }
        };
        ActionKind::Tap { x, y }
    } else {
        let value = match elem.child("value") {
            Some(v) => v.text.clone().unwrap_or_default(),
            None => {
                error!("{} action #{} has no <value>", role, index);
                String::new()
            }
        };
        ActionKind::from_value(type_name.unwrap_or_default(), value)
    };

    Action {
        id,
        description,
        kind,
    }
}

fn coordinate(role: &str, index: usize, coords: &XmlNode, axis: &str) -> i32 {
    match coords.child_text(axis).map(|t| t.trim().parse::<i32>()) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            error!("{} action #{} has a bad {} coordinate: {}", role, index, axis, e);
            0
        }
        None => {
            error!("{} action #{} is missing its {} coordinate", role, index, axis);
            0
        }
    }
}
