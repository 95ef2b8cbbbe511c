//! Image sources (URLs or local paths) to base64, loaded once per prompt.

use base64::Engine;
use tracing::warn;

/// Load every source that resolves; failures are logged and skipped so one
/// bad attachment never sinks the prompt.
pub async fn load_images(sources: &[String]) -> Vec<String> {
    let mut images = Vec::new();
    for source in sources {
        match load_one(source).await {
            Ok(b64) => images.push(b64),
            Err(e) => warn!(source, error = %e, "image load failed"),
        }
    }
    images
}

async fn load_one(source: &str) -> Result<String, String> {
    let bytes = if source.starts_with("http://") || source.starts_with("https://") {
        let resp = reqwest::get(source).await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        resp.bytes().await.map_err(|e| e.to_string())?.to_vec()
    } else {
        tokio::fs::read(source).await.map_err(|e| e.to_string())?
    };
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
