pub mod count;

use anyhow::Result;
use std::io::Read;
use std::path::Path;

/// Assemble the text to measure.
///
/// File content comes first, joined to the prompt words with one space.
/// Without a prompt or file the text is read from `stdin`.
pub fn read_text(prompt: &[String], input: Option<&Path>, mut stdin: impl Read) -> Result<String> {
    let prompt = prompt.join(" ");

    let input = match input {
        Some(path) if path == Path::new("-") => Some(read_all(&mut stdin)?),
        Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read {}: {}", path.display(), e)
        })?),
        None if prompt.is_empty() => Some(read_all(&mut stdin)?),
        None => None,
    };

    let text = match input {
        Some(input) if prompt.is_empty() => input,
        Some(input) => format!("{} {}", input, prompt),
        None => prompt,
    };

    if text.is_empty() {
        anyhow::bail!("No input text provided");
    }
    Ok(text)
}

fn read_all(reader: &mut impl Read) -> Result<String> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    Ok(buf)
}
