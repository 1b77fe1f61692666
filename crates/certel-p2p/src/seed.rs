use std::path::Path;

use certel_core::CertelError;

use crate::peers::PeerManager;

/// Parse a seed list (`nodes_ip.txt`): UTF-8 text, `#` introduces a comment,
/// blank lines ignored, every remaining line one `host:port`.
pub fn load_seed_file(path: &Path) -> Result<Vec<String>, CertelError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CertelError::Storage(format!("reading seed file {}: {e}", path.display())))?;
    Ok(parse_seed_list(&text))
}

pub fn parse_seed_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .filter_map(PeerManager::parse_address)
        .collect()
}
