//! Signaling Wire Messages
//!
//! Every message travels inside a JSON-LD style [`Envelope`] that carries the
//! fixed `@context` and the message `@type`:
//!
//! ```json
//! {
//!   "@context": { "@vocab": "https://w3id.org/edc/v0.0.1/ns/" },
//!   "@type": "DataFlowStartMessage",
//!   "processId": "df1",
//!   ...
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;

use crate::data_flow::{DataAddress, DataFlowState, FlowType, StatusFailure, StatusResult};

/// Vocabulary all signaling terms live in
pub const SIGNALING_VOCAB: &str = "https://w3id.org/edc/v0.0.1/ns/";

pub fn default_context() -> Value {
    json!({ "@vocab": SIGNALING_VOCAB })
}

/// Binds a message body to its `@type`
pub trait WireMessage {
    const TYPE: &'static str;
}

/// `@context` + `@type` wrapper around a message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "@context", default = "default_context")]
    pub context: Value,
    #[serde(rename = "@type")]
    pub message_type: String,
    #[serde(flatten)]
    pub message: T,
}

impl<T: WireMessage> Envelope<T> {
    pub fn new(message: T) -> Self {
        Self {
            context: default_context(),
            message_type: T::TYPE.to_string(),
            message,
        }
    }

    /// Unwrap the body after checking `@type`.
    ///
    /// Accepts the bare term, a compacted `prefix:Term` or the full IRI.
    pub fn into_message(self) -> StatusResult<T> {
        let t = self.message_type.as_str();
        let matches = t == T::TYPE
            || t.rsplit_once(':').is_some_and(|(_, term)| term == T::TYPE)
            || t.strip_prefix(SIGNALING_VOCAB) == Some(T::TYPE);

        if !matches {
            return Err(StatusFailure::bad_request(format!(
                "Expected @type {}, got {}",
                T::TYPE,
                self.message_type
            )));
        }
        Ok(self.message)
    }
}

/// Request to start (or resume) a data flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DataFlowStartMessage {
    /// Data flow id, chosen by the control plane
    pub process_id: String,
    /// Asset being transferred
    pub dataset_id: String,
    pub participant_id: String,
    pub agreement_id: String,
    pub source_data_address: Option<DataAddress>,
    pub destination_data_address: Option<DataAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_address: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub flow_type: Option<FlowType>,
    pub transfer_type_destination: String,
}

impl WireMessage for DataFlowStartMessage {
    const TYPE: &'static str = "DataFlowStartMessage";
}

/// Same shape as a start message, addressed at provisioning only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DataFlowProvisionMessage {
    #[serde(flatten)]
    pub request: DataFlowStartMessage,
}

impl WireMessage for DataFlowProvisionMessage {
    const TYPE: &'static str = "DataFlowProvisionMessage";
}

impl From<DataFlowStartMessage> for DataFlowProvisionMessage {
    fn from(request: DataFlowStartMessage) -> Self {
        Self { request }
    }
}

/// Answer to start/provision requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowResponseMessage {
    /// Address the consumer should use; for push flows the destination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,
    /// True while provisioning is still pending
    pub provisioning: bool,
}

impl WireMessage for DataFlowResponseMessage {
    const TYPE: &'static str = "DataFlowResponseMessage";
}

impl DataFlowResponseMessage {
    pub fn started(data_address: DataAddress) -> Self {
        Self {
            data_address: Some(data_address),
            provisioning: false,
        }
    }

    pub fn provisioning() -> Self {
        Self {
            data_address: None,
            provisioning: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DataFlowSuspendMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WireMessage for DataFlowSuspendMessage {
    const TYPE: &'static str = "DataFlowSuspendMessage";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DataFlowTerminationMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WireMessage for DataFlowTerminationMessage {
    const TYPE: &'static str = "DataFlowTerminationMessage";
}

/// Current state of one flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowStatusMessage {
    pub data_flow_id: String,
    #[schema(value_type = String, example = "STARTED")]
    pub state: DataFlowState,
}

impl WireMessage for DataFlowStatusMessage {
    const TYPE: &'static str = "DataFlowStatusMessage";
}

/// Returned by control-plane registration calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdResponse {
    #[serde(rename = "@id")]
    pub id: String,
    /// Epoch millis
    pub created_at: i64,
}

impl WireMessage for IdResponse {
    const TYPE: &'static str = "IdResponse";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_message_parses_from_json_ld() {
        let raw = json!({
            "@context": { "@vocab": SIGNALING_VOCAB },
            "@type": "DataFlowStartMessage",
            "processId": "df1",
            "datasetId": "asset-1",
            "participantId": "participant1",
            "agreementId": "agreement-1",
            "sourceDataAddress": { "type": "HttpData", "properties": { "baseUrl": "http://src" } },
            "destinationDataAddress": { "type": "HttpData" },
            "properties": { "k": "v" },
            "flowType": "PUSH",
            "transferTypeDestination": "HttpData"
        });

        let envelope: Envelope<DataFlowStartMessage> = serde_json::from_value(raw).unwrap();
        let msg = envelope.into_message().unwrap();
        assert_eq!(msg.process_id, "df1");
        assert_eq!(msg.flow_type, Some(FlowType::Push));
        assert_eq!(
            msg.source_data_address.unwrap().property("baseUrl"),
            Some("http://src")
        );
        assert_eq!(msg.properties.get("k").map(String::as_str), Some("v"));
        assert!(msg.callback_address.is_none());
    }

    #[test]
    fn test_missing_fields_default_instead_of_rejecting() {
        let raw = json!({ "@type": "DataFlowStartMessage" });
        let envelope: Envelope<DataFlowStartMessage> = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.context, default_context());
        let msg = envelope.into_message().unwrap();
        assert!(msg.process_id.is_empty());
        assert!(msg.destination_data_address.is_none());
    }

    #[test]
    fn test_type_mismatch_is_bad_request() {
        let raw = json!({ "@type": "DataFlowSuspendMessage" });
        let envelope: Envelope<DataFlowStartMessage> = serde_json::from_value(raw).unwrap();
        let err = envelope.into_message().unwrap_err();
        assert_eq!(err.kind, crate::data_flow::FailureKind::BadRequest);
    }

    #[test]
    fn test_compacted_and_expanded_types_accepted() {
        for t in [
            "edc:DataFlowTerminationMessage",
            "https://w3id.org/edc/v0.0.1/ns/DataFlowTerminationMessage",
        ] {
            let envelope: Envelope<DataFlowTerminationMessage> =
                serde_json::from_value(json!({ "@type": t, "reason": "done" })).unwrap();
            assert_eq!(
                envelope.into_message().unwrap().reason.as_deref(),
                Some("done")
            );
        }
    }

    #[test]
    fn test_response_envelope_serializes_metadata() {
        let dst = DataAddress::new("HttpData");
        let value =
            serde_json::to_value(Envelope::new(DataFlowResponseMessage::started(dst))).unwrap();
        assert_eq!(value["@type"], "DataFlowResponseMessage");
        assert_eq!(value["@context"]["@vocab"], SIGNALING_VOCAB);
        assert_eq!(value["dataAddress"]["type"], "HttpData");
        assert_eq!(value["provisioning"], false);
    }

    #[test]
    fn test_provision_message_shares_start_shape() {
        let raw = json!({
            "@type": "DataFlowProvisionMessage",
            "processId": "df2",
            "flowType": "PULL"
        });
        let envelope: Envelope<DataFlowProvisionMessage> = serde_json::from_value(raw).unwrap();
        let msg = envelope.into_message().unwrap();
        assert_eq!(msg.request.process_id, "df2");
        assert_eq!(msg.request.flow_type, Some(FlowType::Pull));
    }

    #[test]
    fn test_id_response_shape() {
        let value = serde_json::to_value(IdResponse {
            id: "dp-1".into(),
            created_at: 1_700_000_000_000,
        })
        .unwrap();
        assert_eq!(value["@id"], "dp-1");
        assert_eq!(value["createdAt"], 1_700_000_000_000i64);
    }
}
