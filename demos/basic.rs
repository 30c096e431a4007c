use https_call::{CallOptions, CallRequest, CancellationSignal, Headers, HttpsClient};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let host = std::env::var("HTTPS_CALL_HOST").unwrap_or_else(|_| "httpbin.org".to_owned());

    let client = HttpsClient::from_env()?.with_warning_handler(|warning| {
        eprintln!(
            "attempt {} failed ({:?}): {}",
            warning.attempt, warning.status_code, warning.message
        );
    });

    let response = client
        .get(&host, "/get", json!({"page": 1, "limit": 20}), Headers::new())
        .await?;
    println!("GET -> {} {}", response.status_code, response.body);

    let signal = CancellationSignal::new();
    let response = client
        .call(
            CallRequest::new("POST", &host, "/post")
                .body(json!({"name": "Kit"}))
                .header("X-Request-Source", "demo")
                .options(CallOptions::default().with_max_retries(2).with_deadline_ms(5_000))
                .cancellation(signal),
        )
        .await?;
    println!("POST -> {} {}", response.status_code, response.body);

    Ok(())
}
