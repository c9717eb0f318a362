use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use oid4vp_verifier::{
    config::DuplicateCallbackPolicy,
    core::{authorization_request::AuthorizationRequest, credential::CredentialRef},
    verifier::{
        error::VerifierError,
        session::{MemoryStore, Mutator, Session, SessionError, SessionStore, Status},
    },
};
use oid4vp_verifier_frontend::{CreateRequest, CreateResponse};
use serde_json::json;
use uuid::Uuid;


use jwt_vp::{callback, jwt_vp, presentation, verifier, verifier_with_store, CALLBACK_BASE};

#[tokio::test]
async fn create_issues_pending_request() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);

    let request = verifier
        .create(CreateRequest {
            purpose: "Login".into(),
            requested_credential_types: vec!["VerifiableId".into()],
        })
        .await
        .unwrap();

    assert_eq!(request.state.len(), 43);
    assert_eq!(request.nonce.len(), 43);
    assert_ne!(request.state, request.nonce);

    let authorization_request = AuthorizationRequest::from_url(&request.authorization_url).unwrap();
    assert_eq!(authorization_request.state, request.state);
    assert_eq!(authorization_request.nonce, request.nonce);
    assert_eq!(authorization_request.response_mode, "direct_post");
    assert_eq!(
        authorization_request.redirect_uri.as_str(),
        format!("{CALLBACK_BASE}/{}", request.id)
    );
    assert!(authorization_request.dcql_query.contains("VerifiableId"));

    let view = verifier.status(request.id).await.unwrap();
    assert_eq!(view.status, Status::Pending);
    assert_eq!(view.request_id, request.id.to_string());
    assert_eq!(view.holder, None);
    assert!(!view.has_vp_token);

    let response = CreateResponse::from(request.clone());
    assert_eq!(response.request_id, request.id.to_string());
    assert!(response.authorization_url.starts_with("openid4vp://authorize?"));
}

#[tokio::test]
async fn create_requires_credential_types() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);

    let err = verifier
        .create(CreateRequest {
            purpose: "Login".into(),
            requested_credential_types: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VerifierError::InvalidRequest(_)), "{err}");

    let err = verifier
        .build_presentation_request()
        .with_requested_credential_type("  ")
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn wallet_presentation_completes_session() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);
    let request = verifier
        .build_presentation_request()
        .with_purpose("Login")
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();

    let ack = verifier
        .handle_callback(
            request.id,
            callback(json!({
                "token": presentation("did:example:123"),
                "state": request.state,
            })),
        )
        .await
        .unwrap();
    assert!(ack.ok);
    assert_eq!(ack.status, Status::Completed);

    let view = verifier.status(request.id).await.unwrap();
    assert_eq!(view.status, Status::Completed);
    assert_eq!(view.holder.as_deref(), Some("did:example:123"));
    assert!(view.has_vp_token);
    assert!(view.completed_at.is_some());
    assert_eq!(view.error, None);
    assert_eq!(view.claims.unwrap()["payload"]["iss"], "did:example:123");

    let session = verifier.session(request.id).await.unwrap();
    assert_eq!(session.credentials.len(), 1);
    let CredentialRef::Decoded { claims, .. } = &session.credentials[0] else {
        panic!("expected a decoded credential");
    };
    assert_eq!(claims.claim("iss"), Some(&json!("did:example:issuer")));
    assert!(session.raw_callback.is_some());
}

#[tokio::test]
async fn state_mismatch_leaves_session_pending() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();

    for body in [
        json!({"token": presentation("did:example:123"), "state": "forged"}),
        json!({"token": presentation("did:example:123")}),
    ] {
        let err = verifier
            .handle_callback(request.id, callback(body))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::InvalidState(id) if id == request.id));
        assert_eq!(err.status_code(), 400);
    }

    let view = verifier.status(request.id).await.unwrap();
    assert_eq!(view.status, Status::Pending);
    assert_eq!(view.completed_at, None);
    assert!(!view.has_vp_token);
}

#[tokio::test]
async fn malformed_token_fails_session() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();

    let err = verifier
        .handle_callback(
            request.id,
            callback(json!({"token": "header.payload", "state": request.state})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VerifierError::MalformedToken(_)), "{err}");
    assert_eq!(err.status_code(), 400);

    let view = verifier.status(request.id).await.unwrap();
    assert_eq!(view.status, Status::Failed);
    assert!(view.error.is_some());
    assert!(view.has_vp_token);
    assert_eq!(view.holder, None);
    assert_eq!(view.claims, None);
}

#[tokio::test]
async fn missing_token_fails_session() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();

    let err = verifier
        .handle_callback(request.id, callback(json!({"state": request.state})))
        .await
        .unwrap_err();
    assert!(matches!(err, VerifierError::MissingToken));

    let view = verifier.status(request.id).await.unwrap();
    assert_eq!(view.status, Status::Failed);
    assert!(!view.has_vp_token);
}

#[tokio::test]
async fn wallet_error_is_recorded() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();

    let ack = verifier
        .handle_callback(
            request.id,
            callback(json!({
                "state": request.state,
                "error": "access_denied",
                "error_description": "user declined"
            })),
        )
        .await
        .unwrap();
    assert!(!ack.ok);
    assert_eq!(ack.status, Status::Error);

    let view = verifier.status(request.id).await.unwrap();
    assert_eq!(view.error.as_deref(), Some("access_denied: user declined"));
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);
    let id = Uuid::new_v4();

    let err = verifier.status(id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    let err = verifier
        .handle_callback(id, callback(json!({"token": "a.b.c", "state": "s"})))
        .await
        .unwrap_err();
    assert!(matches!(err, VerifierError::NotFound(i) if i == id));
}

#[tokio::test]
async fn status_reads_are_idempotent() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();
    verifier
        .handle_callback(
            request.id,
            callback(json!({"token": presentation("did:example:1"), "state": request.state})),
        )
        .await
        .unwrap();

    let first = verifier.status(request.id).await.unwrap();
    let second = verifier.status(request.id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn duplicate_callbacks_are_ignored_by_default() {
    let verifier = verifier(DuplicateCallbackPolicy::Ignore);
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();
    let body = |holder: &str| json!({"token": presentation(holder), "state": request.state});

    verifier
        .handle_callback(request.id, callback(body("did:example:first")))
        .await
        .unwrap();
    let before = verifier.status(request.id).await.unwrap();

    let ack = verifier
        .handle_callback(request.id, callback(body("did:example:second")))
        .await
        .unwrap();
    assert_eq!(ack.status, Status::Completed);

    // A late failure does not demote the session either.
    let ack = verifier
        .handle_callback(
            request.id,
            callback(json!({"token": "a.b", "state": request.state})),
        )
        .await
        .unwrap();
    assert_eq!(ack.status, Status::Completed);

    assert_eq!(verifier.status(request.id).await.unwrap(), before);
}

#[tokio::test]
async fn duplicate_callbacks_can_be_rejected() {
    let verifier = verifier(DuplicateCallbackPolicy::Reject);
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();
    let body = json!({"token": presentation("did:example:first"), "state": request.state});

    verifier
        .handle_callback(request.id, callback(body.clone()))
        .await
        .unwrap();
    let err = verifier
        .handle_callback(request.id, callback(body))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VerifierError::DuplicateCallback {
            status: Status::Completed,
            ..
        }
    ));
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn duplicate_callbacks_can_overwrite() {
    let verifier = verifier(DuplicateCallbackPolicy::Overwrite);
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();
    let body = |holder: &str| json!({"token": presentation(holder), "state": request.state});

    verifier
        .handle_callback(request.id, callback(body("did:example:first")))
        .await
        .unwrap();
    let first = verifier.status(request.id).await.unwrap();

    verifier
        .handle_callback(request.id, callback(body("did:example:second")))
        .await
        .unwrap();
    let second = verifier.status(request.id).await.unwrap();

    assert_eq!(second.holder.as_deref(), Some("did:example:second"));
    assert_eq!(second.completed_at, first.completed_at);

    // The state is still checked before anything is replaced.
    let err = verifier
        .handle_callback(
            request.id,
            callback(json!({"token": presentation("did:example:third"), "state": "forged"})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VerifierError::InvalidState(_)));
    assert_eq!(verifier.status(request.id).await.unwrap(), second);
}

/// Records every session state that [MemoryStore] commits.
#[derive(Debug, Default)]
struct RecordingStore {
    inner: MemoryStore,
    commits: Mutex<Vec<Session>>,
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn initiate(&self, session: Session) -> Result<(), SessionError> {
        self.inner.initiate(session).await
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, SessionError> {
        self.inner.get_session(id).await
    }

    async fn update_session(&self, id: Uuid, mutator: Mutator) -> Result<Session, SessionError> {
        let session = self.inner.update_session(id, mutator).await?;
        self.commits.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn remove_session(&self, id: Uuid) -> Result<(), SessionError> {
        self.inner.remove_session(id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callbacks_commit_once() {
    let store = Arc::new(RecordingStore::default());
    let verifier = verifier_with_store(DuplicateCallbackPolicy::Ignore, store.clone());
    let request = verifier
        .build_presentation_request()
        .with_requested_credential_type("VerifiableId")
        .build()
        .await
        .unwrap();

    let id = request.id;
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let verifier = verifier.clone();
            let body = if i % 4 == 0 {
                json!({"token": "not-a-token", "state": request.state})
            } else {
                json!({"token": presentation(&format!("did:example:{i}")), "state": request.state})
            };
            tokio::spawn(async move { verifier.handle_callback(id, callback(body)).await })
        })
        .collect();

    let mut acks = vec![];
    for task in tasks {
        // The one malformed callback that wins the race is reported as such.
        if let Ok(ack) = task.await.unwrap() {
            acks.push(ack);
        }
    }

    let commits = store.commits.lock().unwrap();
    assert_eq!(commits.len(), 1, "{commits:#?}");
    let committed = &commits[0];
    assert!(committed.status.is_terminal());

    let view = verifier.status(request.id).await.unwrap();
    assert_eq!(view.status, committed.status);
    assert_eq!(view.holder, committed.holder);
    assert!(acks.iter().all(|ack| ack.status == committed.status));
}

#[test]
fn tokens_without_vp_claim_use_top_level_credentials() {
    let token = jwt_vp(json!({
        "sub": "did:example:holder",
        "verifiableCredential": {"type": ["VerifiableCredential"]}
    }));
    let claims = oid4vp_verifier::core::token::decode(&token).unwrap();
    let extraction = oid4vp_verifier::core::credential::extract(&claims.payload);
    assert_eq!(extraction.holder.as_deref(), Some("did:example:holder"));
    assert!(matches!(
        extraction.credentials.as_slice(),
        [CredentialRef::Embedded { .. }]
    ));
}
