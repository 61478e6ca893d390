//! Decoding of `wsnt:NotificationMessage` lists into JSON readings.

use serde_json::Value;

use crate::onvif::operations::list;
use crate::soap::envelope::body_xml;
use crate::soap::xml::xml_to_json;
use crate::soap::{SoapError, SoapResult};

/// Extracts the notification messages of a `PullMessagesResponse` body.
pub fn pull_messages(body: &str) -> SoapResult<Vec<Value>> {
    messages_under(body, "PullMessagesResponse")
}

/// Extracts the notification messages of a pushed `Notify` envelope.
pub fn notify_messages(envelope: &str) -> SoapResult<Vec<Value>> {
    messages_under(body_xml(envelope)?, "Notify")
}

fn messages_under(body: &str, container: &str) -> SoapResult<Vec<Value>> {
    let json = xml_to_json(body)?;
    let node = json
        .get(container)
        .ok_or_else(|| SoapError::Decode(format!("missing {container} element")))?;
    Ok(list(node.get("NotificationMessage"))
        .into_iter()
        .cloned()
        .collect())
}
