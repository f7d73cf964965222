//! `blinkproof setup`: downloads the face detector and the 68-point landmark
//! model the daemon needs.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// One model file to fetch.
pub struct ModelSource {
    pub file: &'static str,
    pub url: String,
    pub sha256: Option<String>,
}

/// Download the model from `url` into `dest`, checking `sha256` when given.
fn download_model(name: &str, url: &str, sha256: Option<&str>, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {name}...");

    let resp = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {url}"))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        // Print progress every 10%
        if let Some(len) = content_length.filter(|&len| len > 0) {
            let pct = (total * 100) / len;
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }

    file.flush()?;
    drop(file);

    match blinkproof_models::verify_model(&tmp_path, sha256) {
        Ok(check) if check.pinned => println!("  checksum ok"),
        Ok(check) => println!("  sha256 {} (not pinned)", check.sha256),
        Err(e) => {
            fs::remove_file(&tmp_path).ok();
            bail!("{e}");
        }
    }

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    Ok(())
}

/// Run the setup command: fetch and verify each model in turn.
pub fn run(models: &[ModelSource], model_dir: Option<PathBuf>) -> Result<()> {
    let dir = model_dir.unwrap_or_else(blinkproof_core::default_model_dir);
    println!("Model directory: {}", dir.display());

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    for model in models {
        let name = model.file;
        let dest = dir.join(name);
        if dest.exists() {
            match blinkproof_models::verify_model(&dest, model.sha256.as_deref()) {
                Ok(check) if check.pinned => {
                    println!("  {name} already present (checksum ok)");
                    continue;
                }
                Ok(_) => println!("  {name} exists but no checksum given; re-downloading"),
                Err(e) => println!("  {name} rejected ({e}); re-downloading"),
            }
        }

        download_model(name, &model.url, model.sha256.as_deref(), &dest)?;
        println!();
    }

    println!("Setup complete: {}", dir.display());
    Ok(())
}
