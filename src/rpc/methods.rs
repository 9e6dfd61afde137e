//! Method registry.
//!
//! Each handler is registered together with an [`OutputSpec`] declaring
//! which of its parameters, if any, names the output file or directory it
//! will write. The dispatcher registers that path for cleanup *before*
//! invoking the handler — there is no parameter-shape guessing anywhere.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::HandlerError;
use crate::rpc::progress::ProgressSender;
use crate::AppContext;

pub type HandlerFn =
    Arc<dyn Fn(&AppContext, Value, &ProgressSender) -> Result<Value, HandlerError> + Send + Sync>;

/// Where a method writes its output, declared at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSpec {
    /// The method produces no filesystem output.
    None,
    /// The named parameter is a single output file path.
    File(&'static str),
    /// The named parameter is an output directory the method fills.
    Dir(&'static str),
}

impl OutputSpec {
    /// The parameter key to register, if any.
    pub fn param_key(&self) -> Option<&'static str> {
        match self {
            OutputSpec::None => None,
            OutputSpec::File(key) | OutputSpec::Dir(key) => Some(key),
        }
    }
}

pub struct MethodDef {
    pub output: OutputSpec,
    handler: HandlerFn,
}

impl MethodDef {
    pub fn handler(&self) -> HandlerFn {
        Arc::clone(&self.handler)
    }
}

#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodDef>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, output: OutputSpec, handler: F)
    where
        F: Fn(&AppContext, Value, &ProgressSender) -> Result<Value, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.methods.insert(
            name.to_string(),
            MethodDef {
                output,
                handler: Arc::new(handler),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&MethodDef> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    /// The full production method table.
    pub fn standard() -> Self {
        use OutputSpec::{Dir, File, None as NoOutput};

        let mut reg = Self::new();

        // PDF
        reg.register("pdf.merge", File("outputPath"), crate::pdf::merge);
        reg.register("pdf.split", Dir("outputDir"), crate::pdf::split);
        reg.register("pdf.compress", File("outputPath"), crate::pdf::compress);
        reg.register("pdf.toImages", Dir("outputDir"), crate::pdf::to_images);
        reg.register("pdf.rotate", File("outputPath"), crate::pdf::rotate);
        reg.register(
            "pdf.addWatermark",
            File("outputPath"),
            crate::pdf::add_watermark,
        );
        reg.register("pdf.encrypt", File("outputPath"), crate::pdf::encrypt);
        reg.register("pdf.decrypt", File("outputPath"), crate::pdf::decrypt);
        reg.register("pdf.crack", File("outputPath"), crate::pdf::crack);
        reg.register("pdf.info", NoOutput, crate::pdf::info);

        // Media (ffmpeg)
        reg.register("media.info", NoOutput, crate::media::info);
        reg.register(
            "media.videoCompress",
            File("outputPath"),
            crate::media::video_compress,
        );
        reg.register(
            "media.videoConvert",
            File("outputPath"),
            crate::media::video_convert,
        );
        reg.register(
            "media.audioConvert",
            File("outputPath"),
            crate::media::audio_convert,
        );
        reg.register(
            "media.audioExtract",
            File("outputPath"),
            crate::media::audio_extract,
        );
        reg.register("media.trim", File("outputPath"), crate::media::trim);
        reg.register(
            "media.videoToGif",
            File("outputPath"),
            crate::media::video_to_gif,
        );

        // Image
        reg.register("image.info", NoOutput, crate::imaging::info);
        reg.register(
            "image.createGif",
            File("outputPath"),
            crate::imaging::create_gif,
        );
        reg.register("image.resize", File("outputPath"), crate::imaging::resize);
        reg.register("image.crop", File("outputPath"), crate::imaging::crop);
        reg.register("image.getColors", NoOutput, crate::imaging::get_colors);
        reg.register("image.rotate", File("outputPath"), crate::imaging::rotate);
        reg.register("image.flip", File("outputPath"), crate::imaging::flip);
        reg.register(
            "image.enlarge",
            File("outputPath"),
            crate::imaging::enlarge,
        );

        // Download (yt-dlp)
        reg.register(
            "download.checkNetwork",
            NoOutput,
            crate::download::check_network,
        );
        reg.register(
            "download.getVideoInfo",
            NoOutput,
            crate::download::get_video_info,
        );
        reg.register(
            "download.video",
            Dir("outputPath"),
            crate::download::download_video,
        );

        // Service
        reg.register("system.ping", NoOutput, |_, _, _| {
            Ok(serde_json::json!({ "pong": true }))
        });
        reg.register("system.status", NoOutput, |ctx, _, _| {
            Ok(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "uptime": ctx.started_at.elapsed().as_secs(),
                "activeTasks": ctx.tracker.active_count(),
            }))
        });

        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_declares_output_params() {
        let reg = MethodRegistry::standard();
        assert_eq!(
            reg.get("pdf.merge").unwrap().output,
            OutputSpec::File("outputPath")
        );
        assert_eq!(
            reg.get("pdf.split").unwrap().output,
            OutputSpec::Dir("outputDir")
        );
        assert_eq!(reg.get("media.info").unwrap().output, OutputSpec::None);
        assert!(reg.get("task.cancel").is_none(), "built-ins bypass the table");
    }

    #[test]
    fn every_backend_method_is_registered() {
        let reg = MethodRegistry::standard();
        for name in [
            "pdf.merge",
            "pdf.split",
            "pdf.compress",
            "pdf.toImages",
            "pdf.rotate",
            "pdf.addWatermark",
            "pdf.encrypt",
            "pdf.decrypt",
            "pdf.crack",
            "pdf.info",
            "media.info",
            "media.videoCompress",
            "media.videoConvert",
            "media.audioConvert",
            "media.audioExtract",
            "media.trim",
            "media.videoToGif",
            "image.info",
            "image.createGif",
            "image.resize",
            "image.crop",
            "image.getColors",
            "image.rotate",
            "image.flip",
            "image.enlarge",
            "download.checkNetwork",
            "download.getVideoInfo",
            "download.video",
            "system.ping",
            "system.status",
        ] {
            assert!(reg.contains(name), "missing method {name}");
        }
    }
}
