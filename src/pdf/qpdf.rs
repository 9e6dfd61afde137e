//! Thin wrapper around the qpdf command-line tool.
//!
//! All PDF rewriting (merge, split, rotate, encryption) goes through qpdf;
//! the in-process mupdf engine is only used for reading and rasterizing.

use std::ffi::OsStr;
use std::process::Command;

use anyhow::anyhow;
use tracing::debug;

use crate::error::HandlerError;
use crate::AppContext;

/// Run qpdf with the given arguments, failing on any error.
///
/// Exit code 3 means "succeeded with warnings" and is treated as success.
pub fn run<I, S>(ctx: &AppContext, args: I) -> Result<(), HandlerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let qpdf = ctx.config.qpdf().map_err(HandlerError::Other)?;
    let output = Command::new(&qpdf)
        .args(args)
        .output()
        .map_err(|e| HandlerError::Other(anyhow!("failed to run qpdf: {e}")))?;

    let code = output.status.code().unwrap_or(-1);
    if output.status.success() || code == 3 {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(code, stderr = %stderr.trim(), "qpdf failed");
    Err(HandlerError::Other(anyhow!(
        "qpdf exited with code {code}: {}",
        stderr.trim()
    )))
}

/// Run qpdf and return its raw exit code. Used for predicates
/// (`--is-encrypted`, password checks) where a nonzero exit is an answer,
/// not a failure.
pub fn exit_code<I, S>(ctx: &AppContext, args: I) -> Result<i32, HandlerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let qpdf = ctx.config.qpdf().map_err(HandlerError::Other)?;
    let output = Command::new(&qpdf)
        .args(args)
        .output()
        .map_err(|e| HandlerError::Other(anyhow!("failed to run qpdf: {e}")))?;
    Ok(output.status.code().unwrap_or(-1))
}

/// True when the file carries any PDF encryption (`qpdf --is-encrypted`
/// exits 0 for encrypted files, 2 for plaintext ones).
pub fn is_encrypted(ctx: &AppContext, file: &str) -> Result<bool, HandlerError> {
    Ok(exit_code(ctx, ["--is-encrypted", file])? == 0)
}

/// True when `password` opens the file (`qpdf --check` validates the whole
/// document and fails on a wrong password).
pub fn password_opens(ctx: &AppContext, file: &str, password: &str) -> Result<bool, HandlerError> {
    let arg = format!("--password={password}");
    Ok(exit_code(ctx, [arg.as_str(), "--check", file])? == 0)
}
