//! TinyG JSON response parser
//!
//! TinyG in JSON mode answers every line with `{"r":{...},"f":[1,0,n]}`
//! and pushes `{"sr":{...}}` status reports on its own. A response wraps
//! the payload in `r`; keys inside it are handled like top-level keys.

use serde_json::Value;

/// State names indexed by the `stat` code of a status report
pub const MACHINE_STATES: [&str; 10] = [
    "Init", "Idle", "Alarm", "Idle", "Idle", "Run", "Hold", "Probe", "Run", "Home",
];

/// Position fields of a status report; TinyG only sends what changed
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionUpdate {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub a: Option<f64>,
}

impl PositionUpdate {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none() && self.a.is_none()
    }
}

/// One piece of information decoded from a TinyG line
#[derive(Debug, Clone, PartialEq)]
pub enum TinyGMessage {
    /// Line acknowledged, frees one line of credit
    Ack,
    /// Footer reported a non-zero status
    Fault { code: u32, message: String },
    /// Status report position fields
    Position(PositionUpdate),
    /// Status report machine state, already mapped to a name
    State(&'static str),
    /// Firmware build number
    Firmware(String),
    /// gcode echo, rx report or exception report, forwarded verbatim
    Raw(String),
}

/// Decode one line; `None` when it is not a JSON object
pub fn parse(line: &str) -> Option<Vec<TinyGMessage>> {
    let root: Value = serde_json::from_str(line.trim()).ok()?;
    let mut object = root.as_object()?;
    let mut messages = Vec::new();

    if let Some(response) = object.get("r") {
        let footer = object
            .get("f")
            .or_else(|| response.get("f"))
            .and_then(Value::as_array);
        if let Some((code, message)) = footer.and_then(|f| footer_fault(response, f)) {
            messages.push(TinyGMessage::Fault { code, message });
        }
        messages.push(TinyGMessage::Ack);
        match response.as_object() {
            Some(inner) => object = inner,
            None => return Some(messages),
        }
    }

    if let Some(sr) = object.get("sr") {
        let update = PositionUpdate {
            x: sr.get("posx").and_then(Value::as_f64),
            y: sr.get("posy").and_then(Value::as_f64),
            z: sr.get("posz").and_then(Value::as_f64),
            a: sr.get("posa").and_then(Value::as_f64),
        };
        if !update.is_empty() {
            messages.push(TinyGMessage::Position(update));
        }
        let stat = sr.get("stat").and_then(Value::as_u64);
        if let Some(name) = stat.and_then(|s| MACHINE_STATES.get(s as usize)) {
            messages.push(TinyGMessage::State(name));
        }
    }

    if let Some(fb) = object.get("fb") {
        let build = match fb {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        messages.push(TinyGMessage::Firmware(build));
    }

    if ["gc", "rx", "er"].iter().any(|key| object.contains_key(*key)) {
        messages.push(TinyGMessage::Raw(line.trim().to_string()));
    }

    Some(messages)
}

/// Status code and readable text for a footer whose status byte is not zero
fn footer_fault(response: &Value, footer: &[Value]) -> Option<(u32, String)> {
    let status = footer.get(1).and_then(Value::as_u64)?;
    let read = footer.get(2).and_then(Value::as_u64).unwrap_or(0);
    let text = match status {
        0 => return None,
        108 => format!(
            "TinyG reported a syntax error reading '{}': {} (based on {} bytes read)",
            response, status, read
        ),
        20 => format!(
            "TinyG reported an internal error reading '{}': {} (based on {} bytes read)",
            response, status, read
        ),
        202 => format!(
            "TinyG reported a TOO SHORT MOVE on line {}",
            response.get("n").map(Value::to_string).unwrap_or_default()
        ),
        204 => format!("TinyG reported COMMAND REJECTED BY ALARM '{}'", response),
        _ => format!(
            "TinyG reported an error reading '{}': {} (based on {} bytes read)",
            response, status, read
        ),
    };
    Some((u32::try_from(status).unwrap_or(u32::MAX), text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ack() {
        let messages = parse(r#"{"r":{},"f":[1,0,6]}"#).unwrap();
        assert_eq!(messages, vec![TinyGMessage::Ack]);
    }

    #[test]
    fn test_syntax_error_footer() {
        let messages = parse(r#"{"r":{"gc":"G1 Q5"},"f":[1,108,6]}"#).unwrap();
        match &messages[0] {
            TinyGMessage::Fault { code, message: text } => {
                assert_eq!(*code, 108);
                assert!(text.contains("syntax error"));
                assert!(text.contains("based on 6 bytes"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(messages[1], TinyGMessage::Ack);
        assert!(matches!(messages[2], TinyGMessage::Raw(_)));
    }

    #[test]
    fn test_too_short_move_reports_line() {
        let messages = parse(r#"{"r":{"n":42},"f":[1,202,10]}"#).unwrap();
        assert_eq!(
            messages[0],
            TinyGMessage::Fault {
                code: 202,
                message: "TinyG reported a TOO SHORT MOVE on line 42".to_string(),
            }
        );
    }

    #[test]
    fn test_status_report() {
        let messages = parse(r#"{"sr":{"posx":1.5,"posz":-2,"stat":5}}"#).unwrap();
        assert_eq!(
            messages,
            vec![
                TinyGMessage::Position(PositionUpdate {
                    x: Some(1.5),
                    z: Some(-2.0),
                    ..Default::default()
                }),
                TinyGMessage::State("Run"),
            ]
        );
    }

    #[test]
    fn test_status_inside_response() {
        let messages = parse(r#"{"r":{"sr":{"stat":3}},"f":[1,0,8]}"#).unwrap();
        assert_eq!(messages, vec![TinyGMessage::Ack, TinyGMessage::State("Idle")]);
    }

    #[test]
    fn test_firmware_build() {
        let messages = parse(r#"{"r":{"fb":440.20},"f":[1,0,7]}"#).unwrap();
        assert_eq!(
            messages,
            vec![TinyGMessage::Ack, TinyGMessage::Firmware("440.2".to_string())]
        );
    }

    #[test]
    fn test_not_json() {
        assert_eq!(parse("ok"), None);
        assert_eq!(parse("[1,2]"), None);
    }
}
