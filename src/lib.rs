//! This library provides presentation sessions for an [OID4VP 1.0] verifier.
//!
//! [OID4VP 1.0]: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html>
//!
//! # Verifier Usage
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use oid4vp_verifier::verifier::{session::MemoryStore, Verifier};
//!
//! // Setup verifier.
//! let verifier = Verifier::builder()
//!     .with_client_id("https://verifier.example.com")
//!     .with_callback_base("https://verifier.example.com/presentation/callback".parse()?)
//!     .with_session_store(Arc::new(MemoryStore::default()))
//!     .build()?;
//!
//! // Build a presentation request.
//! let request = verifier
//!     .build_presentation_request()
//!     .with_purpose("Login")
//!     .with_requested_credential_type("VerifiableId")
//!     .build()
//!     .await?;
//!
//! // Present the request to the wallet (e.g., as a QR code).
//! let qr_code = generate_qr_code(&request.authorization_url)?;
//!
//! // When the wallet posts to `<callback_base>/<id>`, record its answer.
//! let payload = CallbackPayload::from_body(content_type, &body)?;
//! let ack = verifier.handle_callback(request.id, payload).await?;
//!
//! // Poll for the outcome.
//! let view = verifier.status(request.id).await?;
//! ```
//!
//! The verifier's storage can be replaced by implementing the [`SessionStore`] trait, and
//! requests can be brokered by a third-party service by implementing the [`Provider`] trait.
//!
//! [`SessionStore`]: crate::verifier::session::SessionStore
//! [`Provider`]: crate::verifier::provider::Provider
//!
//! # Protocol Overview
//!
//! 1. *Verifier creates request*: a session is stored as `pending` with fresh `state` and
//!    `nonce` values, and an [`AuthorizationRequest`] URL is built for the wallet (or obtained
//!    from the provider).
//! 2. *Wallet responds*: the wallet posts a `vp_token` and the `state` to the callback endpoint.
//! 3. *Verifier correlates*: the `state` is compared with the session's, in constant time. A
//!    mismatch is rejected and leaves the session untouched.
//! 4. *Verifier records*: the token is decoded **without verifying its signature**, the
//!    embedded credentials and the holder are recovered, and the session becomes `completed`,
//!    `failed` or `error`. A session leaves `pending` exactly once.
//!
//! [`AuthorizationRequest`]: crate::core::authorization_request::AuthorizationRequest

pub mod config;
pub mod core;
pub mod utils;
pub mod verifier;
