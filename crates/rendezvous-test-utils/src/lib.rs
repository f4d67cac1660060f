//! # Rendezvous Test Utilities
//!
//! Shared test utilities for the Rendezvous service.
//!
//! - `harness` - `TestService`, an in-process service with `TestClient`s that
//!   speak the signaling protocol through the real frame dispatcher
//! - `mock_moderation` - `RecordingModerationSink` captures user reports
//! - `mock_store` - `FailingRoomStore` injects store failures
//! - `fixtures` - `WaitingRequestBuilder` and test configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rendezvous_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let service = TestService::spawn();
//!     let alice = service.connect(None).await;
//!     let bob = service.connect(None).await;
//!
//!     alice.send(&waiting_frame(WaitingRequestBuilder::new().build())).await;
//!     bob.send(&waiting_frame(WaitingRequestBuilder::new().build())).await;
//!
//!     let event = alice.next_event().await;
//!     // assert on match-found...
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_moderation;
pub mod mock_store;

pub use fixtures::*;
pub use harness::*;
pub use mock_moderation::RecordingModerationSink;
pub use mock_store::FailingRoomStore;
