//! Decode command - offline envelope check

use anyhow::{Context, Result};
use envelop::{
  config::Config,
  envelope::{Envelope, TextEncoding},
};
use std::path::Path;

pub async fn cmd_decode(path: &Path, json: bool) -> Result<()> {
  let raw = tokio::fs::read(path)
    .await
    .with_context(|| format!("Failed to read {}", path.display()))?;

  let encoding = TextEncoding::detect(&raw);
  let envelope = Envelope::decode(&raw).with_context(|| format!("{} is not a valid envelope", path.display()))?;
  let chat_id = envelope.chat_id(&Config::load_global().dispatch.chat_suffix);

  if json {
    let value = serde_json::json!({
      "encoding": encoding.label(),
      "country_code": envelope.country_code,
      "mobile_number": envelope.mobile_number,
      "chat_id": chat_id.as_str(),
      "text": envelope.message_text,
      "attachment": envelope.attachment_path.as_ref().map(|p| p.display().to_string()),
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    return Ok(());
  }

  println!("Encoding:   {}", encoding.label());
  println!("Recipient:  {}", envelope.recipient());
  println!("Chat:       {}", chat_id);
  println!("Text:       {}", envelope.message_text);
  match &envelope.attachment_path {
    Some(p) if p.exists() => println!("Attachment: {}", p.display()),
    Some(p) => println!("Attachment: {} (not found)", p.display()),
    None => println!("Attachment: none"),
  }

  Ok(())
}
