//! Structural query predicates
//!
//! A [`Criterion`] names a data-flow field, an operator and an optional
//! right operand. Stores translate it to their own query language; the
//! in-memory store evaluates it directly with [`Criterion::matches`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{StatusFailure, StatusResult};
use super::types::DataFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

/// Operands a criterion may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    State,
    ParticipantId,
    RuntimeId,
    AssetId,
    AgreementId,
    IsConsumer,
    CallbackAddress,
    FlowType,
}

impl Field {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Field::Id),
            "state" => Some(Field::State),
            "participantId" => Some(Field::ParticipantId),
            "runtimeId" => Some(Field::RuntimeId),
            "assetId" => Some(Field::AssetId),
            "agreementId" => Some(Field::AgreementId),
            "isConsumer" => Some(Field::IsConsumer),
            "callbackAddress" => Some(Field::CallbackAddress),
            "transferType.flowType" => Some(Field::FlowType),
            _ => None,
        }
    }

    /// Column expression in `data_flows_tb`
    pub fn column(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::State => "state",
            Field::ParticipantId => "participant_id",
            Field::RuntimeId => "runtime_id",
            Field::AssetId => "asset_id",
            Field::AgreementId => "agreement_id",
            Field::IsConsumer => "is_consumer",
            Field::CallbackAddress => "callback_address",
            Field::FlowType => "transfer_type->>'flowType'",
        }
    }

    /// Value of this field on `flow`, in the JSON form criteria compare against.
    /// `state` compares by numeric id.
    pub fn value_of(&self, flow: &DataFlow) -> Value {
        match self {
            Field::Id => Value::from(flow.id.clone()),
            Field::State => Value::from(flow.state.id()),
            Field::ParticipantId => Value::from(flow.participant_id.clone()),
            Field::RuntimeId => Value::from(flow.runtime_id.clone()),
            Field::AssetId => Value::from(flow.asset_id.clone()),
            Field::AgreementId => Value::from(flow.agreement_id.clone()),
            Field::IsConsumer => Value::from(flow.is_consumer),
            Field::CallbackAddress => flow
                .callback_address
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
            Field::FlowType => Value::from(flow.transfer_type.flow_type.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub left: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Value>,
}

impl Criterion {
    pub fn new(left: impl Into<String>, operator: Operator, right: impl Into<Value>) -> Self {
        Self {
            left: left.into(),
            operator,
            right: Some(right.into()),
        }
    }

    pub fn equals(left: impl Into<String>, right: impl Into<Value>) -> Self {
        Self::new(left, Operator::Eq, right)
    }

    pub fn is_in(left: impl Into<String>, right: Vec<Value>) -> Self {
        Self::new(left, Operator::In, Value::Array(right))
    }

    pub fn is_null(left: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            operator: Operator::IsNull,
            right: None,
        }
    }

    /// Resolve the left operand and check the right operand has the shape
    /// the operator needs.
    pub fn validate(&self) -> StatusResult<Field> {
        let field = Field::parse(&self.left).ok_or_else(|| {
            StatusFailure::bad_request(format!("Unsupported criterion operand: {}", self.left))
        })?;

        match (self.operator, &self.right) {
            (Operator::IsNull | Operator::IsNotNull, _) => Ok(field),
            (Operator::In, Some(Value::Array(_))) => Ok(field),
            (Operator::In, _) => Err(StatusFailure::bad_request(format!(
                "Operator 'in' on {} needs an array operand",
                self.left
            ))),
            (Operator::Eq | Operator::Ne, Some(_)) => Ok(field),
            (Operator::Eq | Operator::Ne, None) => Err(StatusFailure::bad_request(format!(
                "Criterion on {} is missing its right operand",
                self.left
            ))),
        }
    }

    pub fn matches(&self, flow: &DataFlow) -> StatusResult<bool> {
        let field = self.validate()?;
        let actual = field.value_of(flow);

        Ok(match (self.operator, &self.right) {
            (Operator::IsNull, _) => actual.is_null(),
            (Operator::IsNotNull, _) => !actual.is_null(),
            (Operator::Eq, Some(right)) => &actual == right,
            (Operator::Ne, Some(right)) => &actual != right,
            (Operator::In, Some(Value::Array(items))) => items.contains(&actual),
            _ => false,
        })
    }
}

/// All criteria must hold
pub fn matches_all(criteria: &[Criterion], flow: &DataFlow) -> StatusResult<bool> {
    for criterion in criteria {
        if !criterion.matches(flow)? {
            return Ok(false);
        }
    }
    Ok(true)
}
