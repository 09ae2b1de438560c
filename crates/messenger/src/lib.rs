//! Messenger Platform adapter
//!
//! - **Payloads** (`payload`) - outbound text, quick replies and receipt templates
//! - **Gateway** (`gateway`) - `MessagingGateway` seam, Send API client, recording gateway
//! - **Webhook** (`webhook`) - inbound payload model and the verify-token handshake
//!
//! ```text
//! POST /webhook → WebhookPayload::inbound_messages → TurnQueue
//!                                                      ↓
//!           Send API ← MessagingGateway ← ReplySender ← actions
//! ```

pub mod gateway;
pub mod payload;
pub mod webhook;

pub use gateway::{
    DeliveryReceipt, GraphApiGateway, GraphApiSettings, MessagingGateway, RecordedDelivery,
    RecordingGateway,
};
pub use payload::{OutboundMessage, QuickReply, ReceiptBuilder, ReceiptTemplate};
pub use webhook::{
    verify_subscription, Attachment, InboundContent, InboundMessage, VerifyOutcome, VerifyQuery,
    WebhookPayload, WRONG_TOKEN_MESSAGE,
};
