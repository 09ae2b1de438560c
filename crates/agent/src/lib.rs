//! Conversation agent - action graph, NLU engine and turn orchestration
//!
//! - **Actions** (`actions`) - named callbacks the engine drives, plus `send`
//! - **Engine** (`engine`) - `NluEngine` seam and the converse-protocol engine
//! - **Runtime** (`runtime`) - resolve, dispatch under a timeout, persist
//! - **Queue** (`queue`) - per-session workers that keep arrival order
//! - **Orders** / **Small talk** - collaborators behind the terminal actions
//!
//! # Turn lifecycle
//!
//! ```text
//! TurnQueue::submit → session worker → ConversationRuntime::run_turn
//!                                          ↓ turn gate held
//!                        NluEngine::run_actions ⇄ ActionRegistry
//!                                          ↓
//!                               SessionRegistry::set_context
//! ```
//!
//! A failed or timed-out dispatch never commits: the session keeps the
//! context it had before the message arrived.

pub mod actions;
pub mod engine;
pub mod orders;
pub mod queue;
pub mod runtime;
pub mod small_talk;

pub use actions::{
    Action, ActionOutcome, ActionRegistry, EngineReply, Invocation, ReplySender, SendOutcome,
};
pub use engine::{
    ConverseClient, ConverseEngine, ConverseStep, HttpConverseClient, HttpConverseSettings,
    NluEngine,
};
pub use orders::{InMemoryOrderBook, OrderBook};
pub use queue::{TurnQueue, TurnTicket};
pub use runtime::{ConversationRuntime, RuntimeSettings, TurnOutcome};
pub use small_talk::{CannedSmallTalk, HttpSmallTalk, SmallTalk};
