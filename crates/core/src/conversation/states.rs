use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CANCEL_ORDER: &str = "cancelOrder";
pub const TRACK_ORDER: &str = "trackOrder";
pub const NO_INTENT: &str = "noIntent";
pub const GET_ORDER_NUMBER: &str = "getOrderNumber";
pub const MISSING_ORDER_NUMBER: &str = "missingOrderNumber";
pub const ORDER_NUMBER: &str = "orderNumber";
pub const GET_EMAIL: &str = "getEmail";
pub const MISSING_EMAIL: &str = "missingEmail";
pub const EMAIL: &str = "email";
pub const DONE: &str = "done";

const SUCCESS: &str = "success";

/// The mutually exclusive request categories. At most one is ever active
/// because the context holds a single `Option<Intent>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    CancelOrder,
    TrackOrder,
    NoIntent,
}

impl Intent {
    pub fn from_entity_value(value: &str) -> Self {
        match value {
            "cancel_order" => Self::CancelOrder,
            "track_order" => Self::TrackOrder,
            _ => Self::NoIntent,
        }
    }

    pub fn flag(&self) -> &'static str {
        match self {
            Self::CancelOrder => CANCEL_ORDER,
            Self::TrackOrder => TRACK_ORDER,
            Self::NoIntent => NO_INTENT,
        }
    }
}

/// Progress of a value the bot has to collect from the user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    #[default]
    Unset,
    Resolved(String),
    Missing,
}

impl Slot {
    pub fn resolved(&self) -> Option<&str> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Unset | Self::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Conversational state of one session.
///
/// The NLU engine sees this value as a flat JSON object of flags
/// (`ContextFlags`); conversion is lossless in both directions for every value
/// this type can hold.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "ContextFlags", into = "ContextFlags")]
pub struct ConversationContext {
    pub intent: Option<Intent>,
    pub order_number: Slot,
    pub email: Slot,
    pub done: bool,
}

impl ConversationContext {
    pub fn with_intent(intent: Intent) -> Self {
        Self { intent: Some(intent), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_flags(&self) -> ContextFlags {
        ContextFlags::from(self.clone())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextFlags(pub Map<String, Value>);

impl ContextFlags {
    pub fn get(&self, flag: &str) -> Option<&Value> {
        self.0.get(flag)
    }

    pub fn is_set(&self, flag: &str) -> bool {
        self.0.get(flag).is_some_and(truthy)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn text(&self, key: &str) -> String {
        match self.0.get(key) {
            Some(Value::String(value)) => value.clone(),
            Some(Value::Number(value)) => value.to_string(),
            _ => String::new(),
        }
    }

    fn slot(&self, success_flag: &str, missing_flag: &str, value_key: &str) -> Slot {
        if self.is_set(success_flag) {
            Slot::Resolved(self.text(value_key))
        } else if self.is_set(missing_flag) {
            Slot::Missing
        } else {
            Slot::Unset
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl From<ConversationContext> for ContextFlags {
    fn from(context: ConversationContext) -> Self {
        let mut flags = Map::new();

        if let Some(intent) = context.intent {
            flags.insert(intent.flag().to_owned(), Value::Bool(true));
        }
        insert_slot(
            &mut flags,
            &context.order_number,
            GET_ORDER_NUMBER,
            MISSING_ORDER_NUMBER,
            ORDER_NUMBER,
        );
        insert_slot(&mut flags, &context.email, GET_EMAIL, MISSING_EMAIL, EMAIL);
        if context.done {
            flags.insert(DONE.to_owned(), Value::Bool(true));
        }

        Self(flags)
    }
}

fn insert_slot(
    flags: &mut Map<String, Value>,
    slot: &Slot,
    success_flag: &str,
    missing_flag: &str,
    value_key: &str,
) {
    match slot {
        Slot::Unset => {}
        Slot::Resolved(value) => {
            flags.insert(success_flag.to_owned(), Value::String(SUCCESS.to_owned()));
            flags.insert(value_key.to_owned(), Value::String(value.clone()));
        }
        Slot::Missing => {
            flags.insert(missing_flag.to_owned(), Value::Bool(true));
        }
    }
}

impl From<ContextFlags> for ConversationContext {
    fn from(flags: ContextFlags) -> Self {
        let intent = [Intent::CancelOrder, Intent::TrackOrder, Intent::NoIntent]
            .into_iter()
            .find(|intent| flags.is_set(intent.flag()));

        Self {
            intent,
            order_number: flags.slot(GET_ORDER_NUMBER, MISSING_ORDER_NUMBER, ORDER_NUMBER),
            email: flags.slot(GET_EMAIL, MISSING_EMAIL, EMAIL),
            done: flags.is_set(DONE),
        }
    }
}
