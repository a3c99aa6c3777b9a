use std::process::{Command, Stdio};
use std::io::{Write, BufRead, BufReader};
use std::sync::mpsc::{channel, Sender, Receiver};
use std::thread;
use std::time::Duration;
use serde_json::{json, Value};

/// Helper struct to manage the `booktrack mcp` process with async I/O
struct McpClient {
    child: std::process::Child,
    tx: Sender<Value>,
    rx: Receiver<Value>,
}

impl McpClient {
    fn spawn() -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_booktrack"))
            .arg("mcp")
            .env("BOOKTRACK_DB_PATH", "sqlite::memory:")
            .env_remove("BOOKTRACK_ISBN__API_KEY")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())  // Suppress log output in tests
            .spawn()
            .expect("Failed to spawn booktrack binary");

        let mut stdin = child.stdin.take().expect("Failed to get stdin");
        let stdout = child.stdout.take().expect("Failed to get stdout");

        let (req_tx, req_rx) = channel::<Value>();
        let (resp_tx, resp_rx) = channel::<Value>();

        thread::spawn(move || {
            while let Ok(request) = req_rx.recv() {
                let request_str = serde_json::to_string(&request).expect("Failed to serialize");
                if writeln!(stdin, "{}", request_str).is_err() {
                    break;
                }
                if stdin.flush().is_err() {
                    break;
                }
            }
        });

        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        if let Ok(value) = serde_json::from_str::<Value>(&line) {
                            if resp_tx.send(value).is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        McpClient {
            child,
            tx: req_tx,
            rx: resp_rx,
        }
    }

    /// Spawn and complete the initialize handshake.
    fn initialized() -> Self {
        let client = Self::spawn();
        client
            .send_request(json!({
                "jsonrpc": "2.0",
                "method": "initialize",
                "id": 1,
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "1.0"}
                }
            }))
            .expect("Failed to initialize");
        client.send_notification(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }));
        client
    }

    fn send_request(&self, request: Value) -> Option<Value> {
        self.tx.send(request).ok()?;
        self.rx.recv_timeout(Duration::from_secs(5)).ok()
    }

    fn send_notification(&self, notification: Value) {
        let _ = self.tx.send(notification);
        // Notifications don't have responses, give server time to process
        thread::sleep(Duration::from_millis(50));
    }

    fn call_tool(&self, id: u64, name: &str, arguments: Value) -> Value {
        self.send_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": id,
            "params": {"name": name, "arguments": arguments}
        }))
        .unwrap_or_else(|| panic!("No response from {}", name))
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_initialize_handshake() {
    let client = McpClient::spawn();

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "id": 1,
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0.0"}
            }
        }))
        .expect("Failed to get initialize response");

    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);

    let result = &response["result"];
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert!(result["capabilities"]["tools"].is_object());
    assert!(result["capabilities"]["resources"].is_object());
    assert_eq!(result["serverInfo"]["name"], "booktrack");
    assert!(result["serverInfo"]["version"].is_string());
}

#[test]
fn test_tool_discovery() {
    let client = McpClient::initialized();

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/list",
            "id": 2
        }))
        .expect("Failed to get tools/list response");

    let tools = response["result"]["tools"].as_array().expect("tools array");
    assert_eq!(tools.len(), 10, "Should have exactly 10 tools");

    let tool_names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    for expected in [
        "search_books",
        "get_book",
        "search_tags",
        "add_tag",
        "add_read_date",
        "summary_by_year",
        "recent_reads",
        "report",
        "estimate_completion",
        "health_check",
    ] {
        assert!(tool_names.contains(&expected), "missing tool {}", expected);
    }

    for tool in tools {
        assert!(tool["description"].is_string());
        assert!(tool["inputSchema"].is_object());
    }
}

#[test]
fn test_search_books_validation_error() {
    let client = McpClient::initialized();

    let response = client.call_tool(2, "search_books", json!({"filters": {"Title": ""}}));
    let result = &response["result"];
    assert_eq!(result["isError"], true, "Should have isError: true");

    let content_arr = result["content"].as_array().expect("content should be array");
    let error_text = content_arr[0]["text"].as_str().expect("should have error text");
    assert!(error_text.contains("filters"), "Error should mention 'filters': {}", error_text);
}

#[test]
fn test_get_unknown_book() {
    let client = McpClient::initialized();

    let response = client.call_tool(2, "get_book", json!({"id": 99}));
    let result = &response["result"];
    assert_eq!(result["isError"], true);
    if result["structuredContent"].is_object() {
        assert_eq!(result["structuredContent"]["error"], "Book not found: 99");
    }
}

#[test]
fn test_empty_summary() {
    let client = McpClient::initialized();

    let response = client.call_tool(2, "summary_by_year", json!({}));
    let result = &response["result"];
    assert!(result["isError"].is_null() || result["isError"] == false);
    if result["structuredContent"].is_object() {
        let summary = &result["structuredContent"];
        assert_eq!(summary["header"], json!(["year", "pages read", "books read"]));
        assert_eq!(summary["data"], json!([]));
    }
}

#[test]
fn test_health_check() {
    let client = McpClient::initialized();

    let response = client.call_tool(2, "health_check", json!({}));
    let result = &response["result"];
    assert!(result["isError"].is_null() || result["isError"] == false);

    if result["structuredContent"].is_object() {
        let health = &result["structuredContent"];
        assert_eq!(health["status"], "ok");
        assert!(health["version"].is_string());
        assert!(health["uptime_seconds"].is_number());
    }
}

#[test]
fn test_resources() {
    let client = McpClient::initialized();

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "resources/list",
            "id": 2
        }))
        .expect("Failed to get resources/list response");
    let uris: Vec<&str> = response["result"]["resources"]
        .as_array()
        .expect("resources array")
        .iter()
        .filter_map(|r| r["uri"].as_str())
        .collect();
    assert_eq!(uris, vec!["books://recent", "books://summary"]);

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 3,
            "params": {"uri": "books://recent"}
        }))
        .expect("Failed to get resources/read response");
    let text = response["result"]["contents"][0]["text"].as_str().expect("text contents");
    assert!(text.starts_with("No books read recently"));

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 4,
            "params": {"uri": "shelf://nothing"}
        }))
        .expect("Failed to get resources/read response");
    assert!(response["error"].is_object());
}

#[test]
fn test_search_resources() {
    let client = McpClient::initialized();

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 3,
            "params": {"uri": "books://search?Title="}
        }))
        .expect("Failed to get resources/read response");
    assert_eq!(response["error"]["code"], -32602, "empty search should be invalid params");

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 4,
            "params": {"uri": "books://search?Author=nobody"}
        }))
        .expect("Failed to get resources/read response");
    let text = response["result"]["contents"][0]["text"].as_str().expect("text contents");
    let table: Value = serde_json::from_str(text).unwrap();
    assert_eq!(table["header"][0], "BookCollectionID");
    assert_eq!(table["data"], json!([]));

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 5,
            "params": {"uri": "tags://search?poetry"}
        }))
        .expect("Failed to get resources/read response");
    let text = response["result"]["contents"][0]["text"].as_str().expect("text contents");
    let table: Value = serde_json::from_str(text).unwrap();
    assert_eq!(table["header"], json!(["BookCollectionID", "TagID", "Tag"]));
    assert_eq!(table["data"], json!([]));
}
