use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use git_hook_dispatch::middleware::InboundRequest;
use git_hook_dispatch::signature::sign;
use git_hook_dispatch::{Action, ERROR_EVENT, Event, GitHook, HookConfig, HookError, SPAWN_EVENT};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

fn post() -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn json_request(body: &str) -> Request<Body> {
    post().body(Body::from(body.to_string())).unwrap()
}

fn error_messages(hook: &GitHook) -> Arc<Mutex<Vec<String>>> {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let m = messages.clone();
    hook.on(ERROR_EVENT, move |event| {
        if let Some(err) = event.error() {
            m.lock().unwrap().push(err.to_string());
        }
        Ok(())
    });
    messages
}

#[cfg(unix)]
#[tokio::test]
async fn shell_action_exit_code_is_observable() {
    let hook = GitHook::new(HookConfig::new("main", "exit 1")).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    hook.on(SPAWN_EVENT, move |event| {
        let handle = event.process().ok_or("spawn without process")?;
        let child = handle.take().ok_or("child already taken")?;
        tx.send(child).map_err(|e| e.to_string())?;
        Ok(())
    });

    let (status, body) = send(hook.router(), json_request(r#"{"ref":"main"}"#)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, "Accepted\n");

    let mut child = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let exit = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit.code(), Some(1));
}

#[cfg(unix)]
#[tokio::test]
async fn shell_action_only_for_watched_ref() {
    let hook = GitHook::new(HookConfig::new("main", "exit 0")).unwrap();
    let spawned = Arc::new(Mutex::new(0));
    let s = spawned.clone();
    hook.on(SPAWN_EVENT, move |event| {
        if event.process().and_then(|h| h.take()).is_some() {
            *s.lock().unwrap() += 1;
        }
        Ok(())
    });

    let (status, _) = send(hook.router(), json_request(r#"{"ref":"dev"}"#)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(*spawned.lock().unwrap(), 0);

    let (status, _) = send(hook.router(), json_request(r#"{"ref":"main"}"#)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(*spawned.lock().unwrap(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn concurrent_deliveries_each_spawn_a_process() {
    let hook = GitHook::new(HookConfig::new("main", "exit 0")).unwrap();
    let children = Arc::new(Mutex::new(Vec::new()));
    let c = children.clone();
    hook.on(SPAWN_EVENT, move |event| {
        let handle = event.process().ok_or("spawn without process")?;
        let child = handle.take().ok_or("child already taken")?;
        c.lock().unwrap().push(child);
        Ok(())
    });

    let router = hook.router();
    let (first, second) = tokio::join!(
        send(router.clone(), json_request(r#"{"ref":"main"}"#)),
        send(router.clone(), json_request(r#"{"ref":"main"}"#)),
    );
    assert_eq!(first.0, StatusCode::ACCEPTED);
    assert_eq!(second.0, StatusCode::ACCEPTED);

    let mut children = std::mem::take(&mut *children.lock().unwrap());
    assert_eq!(children.len(), 2);
    assert_ne!(children[0].id(), children[1].id());
    for child in &mut children {
        let exit = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(exit.success());
    }
}

#[tokio::test]
async fn missing_signature_is_401() {
    let hook = GitHook::new(HookConfig::new("main", "exit 1").with_secret("s3cr3t")).unwrap();
    let errors = error_messages(&hook);

    let (status, _) = send(hook.router(), json_request(r#"{"ref":"main"}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(*errors.lock().unwrap(), vec!["no provider signature"]);
}

#[tokio::test]
async fn bad_signature_is_401() {
    let hook = GitHook::new(HookConfig::new("main", "exit 1").with_secret("test-secret")).unwrap();
    let errors = error_messages(&hook);

    let request = post()
        .header("x-hub-signature", "thisisabadsignature")
        .body(Body::from(r#"{"ref":"main"}"#))
        .unwrap();
    let (status, _) = send(hook.router(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(*errors.lock().unwrap(), vec!["signature validation failed"]);
}

#[tokio::test]
async fn valid_signature_is_accepted() {
    let secret = "test-secret";
    let body = r#"{"ref":"main"}"#;
    let hook = GitHook::new(
        HookConfig::new("main", Action::callback(|_| Ok(()))).with_secret(secret),
    )
    .unwrap();

    let request = post()
        .header("X-Hub-Signature", sign(secret, body.as_bytes()).unwrap())
        .body(Body::from(body))
        .unwrap();
    let (status, text) = send(hook.router(), request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(text, "Accepted\n");
}

#[tokio::test]
async fn oversized_body_never_reaches_the_hook() {
    let hook = GitHook::new(
        HookConfig::new("main", Action::callback(|_| Ok(()))).with_json_limit("1kb"),
    )
    .unwrap();
    let errors = error_messages(&hook);
    let hooks = Arc::new(Mutex::new(0));
    let h = hooks.clone();
    hook.on("hook", move |_| {
        *h.lock().unwrap() += 1;
        Ok(())
    });

    let body = format!(r#"{{"ref":"main","str":"{}"}}"#, ".".repeat(1024));
    let (status, _) = send(hook.router(), json_request(&body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(*hooks.lock().unwrap(), 0);
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn default_limit_accepts_large_pushes() {
    let hook = GitHook::new(HookConfig::new("main", Action::callback(|_| Ok(())))).unwrap();
    let body = format!(r#"{{"ref":"main","str":"{}"}}"#, ".".repeat(999_990));
    let (status, _) = send(hook.router(), json_request(&body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let body = format!(r#"{{"ref":"main","str":"{}"}}"#, ".".repeat(1024 * 1024));
    let (status, _) = send(hook.router(), json_request(&body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn callback_on_create() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let c = calls.clone();
    let hook = GitHook::new(HookConfig::new(
        "main",
        Action::callback(move |event| {
            let payload = event.payload().ok_or("missing payload")?;
            c.lock().unwrap().push(payload.value().clone());
            Ok(())
        }),
    ))
    .unwrap();

    let categories = Arc::new(Mutex::new(Vec::new()));
    for name in ["create", "delete", "push"] {
        let categories = categories.clone();
        hook.on(name, move |_| {
            categories.lock().unwrap().push(name);
            Ok(())
        });
    }

    let (status, _) = send(
        hook.router(),
        json_request(r#"{"ref":"main","created":true}"#),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(*categories.lock().unwrap(), vec!["create"]);
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["created"], true);
}

#[tokio::test]
async fn ping_is_200_without_events() {
    let hook = GitHook::new(HookConfig::new("main", Action::callback(|_| Ok(())))).unwrap();
    let fired = Arc::new(Mutex::new(Vec::new()));
    for name in ["push", "hook", "main", "error"] {
        let fired = fired.clone();
        hook.on(name, move |_| {
            fired.lock().unwrap().push(name);
            Ok(())
        });
    }

    let request = post()
        .header("X-GitHub-Event", "ping")
        .body(Body::from(
            r#"{"zen":"thisisatest","hook_id":"thisisatest","hook":"thisisatest"}"#,
        ))
        .unwrap();
    let (status, _) = send(hook.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fired.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_payloads_are_400() {
    let hook = GitHook::new(HookConfig::new("main", Action::callback(|_| Ok(())))).unwrap();
    let errors = error_messages(&hook);

    let (status, _) = send(hook.router(), json_request("{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(hook.router(), json_request("asdf")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let errors = errors.lock().unwrap();
    assert_eq!(errors[0], "invalid ref");
    assert!(errors[1].starts_with("malformed payload"));
}

#[tokio::test]
async fn middleware_list_runs_before_dispatch() {
    let passed = Arc::new(Mutex::new(Vec::new()));
    let (first, second) = (passed.clone(), passed.clone());
    let hook = GitHook::new(
        HookConfig::new("main", Action::callback(|_| Ok(())))
            .with_middleware(move |_: &InboundRequest<'_>| {
                first.lock().unwrap().push(1);
                Ok(())
            })
            .with_middleware(move |_: &InboundRequest<'_>| {
                second.lock().unwrap().push(2);
                Ok(())
            }),
    )
    .unwrap();

    let (status, _) = send(hook.router(), json_request(r#"{"ref":"main"}"#)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(*passed.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn listener_error_is_500_with_message() {
    let hook = GitHook::new(HookConfig::new("main", Action::callback(|_| Ok(())))).unwrap();
    hook.on("push", |_| Err("push listener broke".into()));
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let k = kinds.clone();
    hook.on(ERROR_EVENT, move |event: &Event| {
        k.lock()
            .unwrap()
            .push(matches!(event.error(), Some(HookError::Dispatch(_))));
        Ok(())
    });

    let (status, body) = send(hook.router(), json_request(r#"{"ref":"main"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "push listener broke");
    assert_eq!(*kinds.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn every_hook_form_watches_all_refs() {
    let calls = Arc::new(Mutex::new(0));
    let c = calls.clone();
    let hook = GitHook::new(HookConfig::for_every_hook(Action::callback(move |_| {
        *c.lock().unwrap() += 1;
        Ok(())
    })))
    .unwrap();

    for body in [r#"{"ref":"main"}"#, r#"{"ref":"dev","deleted":true}"#] {
        let (status, _) = send(hook.router(), json_request(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    assert_eq!(*calls.lock().unwrap(), 2);
}

#[tokio::test]
async fn only_post_root_is_routed() {
    let hook = GitHook::new(HookConfig::new("main", Action::callback(|_| Ok(())))).unwrap();
    let request = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(hook.router(), request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let request = Request::builder()
        .method("POST")
        .uri("/other")
        .body(Body::from(r#"{"ref":"main"}"#))
        .unwrap();
    let (status, _) = send(hook.router(), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
