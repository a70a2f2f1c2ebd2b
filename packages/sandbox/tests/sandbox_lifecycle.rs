// ABOUTME: Integration tests for the complete sandbox lifecycle over the HTTP provider
// ABOUTME: Exercises create, run, status and terminate against a mock platform API

use drover_sandbox::{
    CreateSandboxConfig, HttpProvider, SandboxConfig, SandboxManager, SandboxRegistry,
    SandboxState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_platform(server: &MockServer) {
    let doc = json!({
        "id": "sbx_life",
        "status": "running",
        "routes": [
            { "port": 4096, "url": "https://4096-sbx_life.drover.run" },
            { "port": 3000, "url": "https://3000-sbx_life.drover.run" }
        ]
    });

    Mock::given(method("POST"))
        .and(path("/v1/sandboxes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(doc.clone()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/sandboxes/sbx_life"))
        .respond_with(ResponseTemplate::new(200).set_body_json(doc))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/sandboxes/sbx_life/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exit_code": 0,
            "stdout": "hello\n",
            "stderr": ""
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/sandboxes/sbx_life/stop"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
}

fn manager_for(server: &MockServer) -> SandboxManager {
    let provider = HttpProvider::new(server.uri(), "tok_life").unwrap();
    let config = SandboxConfig::default()
        .with_platform_token("tok_life")
        .with_agent_server_grace(Duration::ZERO);
    SandboxManager::new(Arc::new(provider), Arc::new(SandboxRegistry::new()), config)
}

#[tokio::test]
async fn test_create_run_terminate() {
    let server = MockServer::start().await;
    mount_platform(&server).await;
    let manager = manager_for(&server);

    let created = manager
        .create(CreateSandboxConfig {
            repo_url: "https://github.com/acme/widgets.git".to_string(),
            branch: "main".to_string(),
            credential: None,
            model_credential: Some("sk-ant-life".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(created.sandbox_id, "sbx_life");
    assert_eq!(created.sandbox_url, "https://4096-sbx_life.drover.run");
    assert_eq!(manager.list().await.len(), 1);

    let output = manager
        .run_command("sbx_life", &["echo".to_string(), "hello".to_string()])
        .await
        .unwrap();
    assert_eq!(output.stdout, "hello\n");

    assert_eq!(manager.get_status("sbx_life").await, SandboxState::Running);

    manager.terminate("sbx_life").await;
    assert!(manager.list().await.is_empty());

    // Unregistered ids report stopped without asking the platform
    assert_eq!(manager.get_status("sbx_life").await, SandboxState::Stopped);
}
