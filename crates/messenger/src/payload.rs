use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuickReply {
    pub content_type: &'static str,
    pub title: String,
    pub payload: String,
}

impl QuickReply {
    pub fn text(title: impl Into<String>) -> Self {
        let title = title.into();
        Self { content_type: "text", payload: title.to_ascii_uppercase(), title }
    }
}

/// An outbound message in the shape the Send API expects under `message`.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    Text { text: String, quick_replies: Vec<QuickReply> },
    Receipt(ReceiptTemplate),
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into(), quick_replies: Vec::new() }
    }

    pub fn with_quick_replies(self, replies: Vec<QuickReply>) -> Self {
        match self {
            Self::Text { text, .. } => Self::Text { text, quick_replies: replies },
            other => other,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Receipt(_) => "receipt",
        }
    }

    pub fn message_body(&self) -> Result<Value, serde_json::Error> {
        let body = match self {
            Self::Text { text, quick_replies } if quick_replies.is_empty() => {
                json!({ "text": text })
            }
            Self::Text { text, quick_replies } => {
                json!({ "text": text, "quick_replies": serde_json::to_value(quick_replies)? })
            }
            Self::Receipt(receipt) => {
                let mut payload = serde_json::to_value(receipt)?;
                if let Value::Object(fields) = &mut payload {
                    fields.insert("template_type".to_owned(), json!("receipt"));
                }
                json!({ "attachment": { "type": "template", "payload": payload } })
            }
        };
        Ok(body)
    }

    /// Full Send API request body for `recipient_id`.
    pub fn send_request(&self, recipient_id: &str) -> Result<Value, serde_json::Error> {
        Ok(json!({ "recipient": { "id": recipient_id }, "message": self.message_body()? }))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReceiptTemplate {
    pub recipient_name: String,
    pub order_number: String,
    pub currency: String,
    pub payment_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub elements: Vec<ReceiptElement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<ReceiptAddress>,
    pub summary: ReceiptSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<ReceiptAdjustment>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReceiptElement {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReceiptAddress {
    pub street_1: String,
    pub street_2: String,
    pub city: String,
    pub postal_code: String,
    pub state: String,
    pub country: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReceiptSummary {
    #[serde(with = "rust_decimal::serde::float_option", skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", skip_serializing_if = "Option::is_none")]
    pub shipping_cost: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", skip_serializing_if = "Option::is_none")]
    pub total_tax: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReceiptAdjustment {
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

pub struct ReceiptBuilder {
    template: ReceiptTemplate,
}

impl ReceiptBuilder {
    pub fn new(
        recipient_name: impl Into<String>,
        order_number: impl Into<String>,
        currency: impl Into<String>,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            template: ReceiptTemplate {
                recipient_name: recipient_name.into(),
                order_number: order_number.into(),
                currency: currency.into(),
                payment_method: payment_method.into(),
                order_url: None,
                timestamp: None,
                elements: Vec::new(),
                address: None,
                summary: ReceiptSummary {
                    subtotal: None,
                    shipping_cost: None,
                    total_tax: None,
                    total_cost: Decimal::ZERO,
                },
                adjustments: Vec::new(),
            },
        }
    }

    pub fn order_url(mut self, url: impl Into<String>) -> Self {
        self.template.order_url = Some(url.into());
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.template.timestamp = Some(timestamp.to_string());
        self
    }

    pub fn element<F>(mut self, title: impl Into<String>, price: Decimal, build: F) -> Self
    where
        F: FnOnce(&mut ElementBuilder),
    {
        let mut builder = ElementBuilder {
            element: ReceiptElement {
                title: title.into(),
                subtitle: None,
                quantity: 1,
                price,
                currency: None,
                image_url: None,
            },
        };
        build(&mut builder);
        self.template.elements.push(builder.element);
        self
    }

    pub fn address(mut self, address: ReceiptAddress) -> Self {
        self.template.address = Some(address);
        self
    }

    pub fn summary<F>(mut self, total_cost: Decimal, build: F) -> Self
    where
        F: FnOnce(&mut SummaryBuilder),
    {
        let mut builder = SummaryBuilder {
            summary: ReceiptSummary {
                subtotal: None,
                shipping_cost: None,
                total_tax: None,
                total_cost,
            },
        };
        build(&mut builder);
        self.template.summary = builder.summary;
        self
    }

    pub fn adjustment(mut self, name: impl Into<String>, amount: Decimal) -> Self {
        self.template.adjustments.push(ReceiptAdjustment { name: name.into(), amount });
        self
    }

    pub fn build(self) -> ReceiptTemplate {
        self.template
    }
}

pub struct ElementBuilder {
    element: ReceiptElement,
}

impl ElementBuilder {
    pub fn subtitle(&mut self, subtitle: impl Into<String>) -> &mut Self {
        self.element.subtitle = Some(subtitle.into());
        self
    }

    pub fn quantity(&mut self, quantity: u32) -> &mut Self {
        self.element.quantity = quantity;
        self
    }

    pub fn currency(&mut self, currency: impl Into<String>) -> &mut Self {
        self.element.currency = Some(currency.into());
        self
    }

    pub fn image_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.element.image_url = Some(url.into());
        self
    }
}

pub struct SummaryBuilder {
    summary: ReceiptSummary,
}

impl SummaryBuilder {
    pub fn subtotal(&mut self, value: Decimal) -> &mut Self {
        self.summary.subtotal = Some(value);
        self
    }

    pub fn shipping_cost(&mut self, value: Decimal) -> &mut Self {
        self.summary.shipping_cost = Some(value);
        self
    }

    pub fn total_tax(&mut self, value: Decimal) -> &mut Self {
        self.summary.total_tax = Some(value);
        self
    }
}
