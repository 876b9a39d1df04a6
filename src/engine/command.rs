use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use futures::FutureExt;
use futures::channel::oneshot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{EngineFuture, EngineOptions, RenderEngine, RenderRequest};
use crate::error::{EngineError, Error, Result};
use crate::theme::Theme;

const CONFIG_PLACEHOLDER: &str = "{config}";

/// Command lines for the external engines. `{theme}` and `{id}` in an
/// argument are replaced per render. `{config}` becomes the path of a JSON
/// file holding the configured [`EngineOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_graphviz")]
    pub graphviz: Vec<String>,
    #[serde(default = "default_mermaid")]
    pub mermaid: Vec<String>,
}

fn default_graphviz() -> Vec<String> {
    ["dot", "-Tsvg"].map(String::from).to_vec()
}
fn default_mermaid() -> Vec<String> {
    [
        "mmdc",
        "--input",
        "-",
        "--output",
        "-",
        "--outputFormat",
        "svg",
        "--theme",
        "{theme}",
        "--svgId",
        "{id}",
        "--configFile",
        CONFIG_PLACEHOLDER,
    ]
    .map(String::from)
    .to_vec()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        CommandsConfig {
            graphviz: default_graphviz(),
            mermaid: default_mermaid(),
        }
    }
}

/// Runs an external program per render: description on stdin, SVG on stdout.
#[derive(Debug)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    options: Mutex<EngineOptions>,
}

impl CommandEngine {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("engine command line is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            options: Mutex::new(EngineOptions::default()),
        })
    }

    pub fn graphviz(config: &CommandsConfig) -> Result<Self> {
        Self::new(&config.graphviz)
    }

    pub fn mermaid(config: &CommandsConfig) -> Result<Self> {
        Self::new(&config.mermaid)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn options(&self) -> EngineOptions {
        self.options.lock().clone()
    }

    fn wants_config(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(CONFIG_PLACEHOLDER))
    }

    fn expand_args(&self, request: &RenderRequest, theme: Theme, config: Option<&Path>) -> Vec<String> {
        let config = config.map(|path| path.to_string_lossy()).unwrap_or_default();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{theme}", theme.engine_theme())
                    .replace("{id}", &request.render_id)
                    .replace(CONFIG_PLACEHOLDER, &config)
            })
            .collect()
    }
}

fn write_config(options: &EngineOptions, theme: Theme) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("atlas-engine-")
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut file, &options.engine_config(theme))?;
    file.flush()?;
    Ok(file)
}

fn run(program: &str, args: &[String], input: String) -> std::result::Result<String, EngineError> {
    let spawn_error = |e: std::io::Error| EngineError::Spawn {
        program: program.to_string(),
        message: e.to_string(),
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    // Written from its own thread so a large description cannot deadlock
    // against a full stdout pipe.
    let writer = child.stdin.take().map(|mut stdin| {
        thread::spawn(move || {
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                debug!(error = %e, "engine closed stdin early");
            }
        })
    });

    let output = child.wait_with_output().map_err(spawn_error)?;
    if let Some(writer) = writer {
        let _ = writer.join();
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", program, output.status)
        } else {
            stderr
        };
        return Err(EngineError::Rejected(message));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| EngineError::Rejected(format!("engine output is not UTF-8: {}", e)))
}

impl RenderEngine for CommandEngine {
    fn configure(&self, options: &EngineOptions) {
        *self.options.lock() = options.clone();
    }

    fn render(&self, request: RenderRequest) -> EngineFuture {
        let options = self.options();
        if let Err(err) = options.check_size(&request.description) {
            return futures::future::ready(Err(err)).boxed_local();
        }

        let theme = request.theme.or(options.theme).unwrap_or_default();
        let config_file = if self.wants_config() {
            match write_config(&options, theme) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(error = %e, "failed to write engine config");
                    return futures::future::ready(Err(EngineError::Spawn {
                        program: self.program.clone(),
                        message: format!("cannot write config file: {}", e),
                    }))
                    .boxed_local();
                }
            }
        } else {
            None
        };

        let program = self.program.clone();
        let args = self.expand_args(&request, theme, config_file.as_ref().map(NamedTempFile::path));
        let (sender, receiver) = oneshot::channel();
        debug!(program = %program, id = %request.render_id, "spawning engine");

        let spawned = thread::Builder::new()
            .name(format!("engine-{}", request.render_id))
            .spawn(move || {
                let result = run(&program, &args, request.description);
                // The engine has exited; the config file can go.
                drop(config_file);
                let _ = sender.send(result);
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start engine worker");
            return futures::future::ready(Err(EngineError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            }))
            .boxed_local();
        }

        async move { receiver.await.unwrap_or(Err(EngineError::Canceled)) }.boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::theme::Theme;

    fn request(description: &str) -> RenderRequest {
        RenderRequest {
            render_id: "graph_content".to_string(),
            description: description.to_string(),
            theme: Some(Theme::Dark),
        }
    }

    #[test]
    fn empty_command_line_is_a_config_error() {
        assert!(matches!(CommandEngine::new(&[]), Err(Error::Config(_))));
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        let at = args.iter().position(|arg| arg == flag)?;
        args.get(at + 1).map(String::as_str)
    }

    #[test]
    fn placeholders_expand_per_request() {
        let engine = CommandEngine::mermaid(&CommandsConfig::default()).unwrap();
        assert_eq!(engine.program(), "mmdc");
        assert!(engine.wants_config());

        let args = engine.expand_args(
            &request("graph TD; A-->B"),
            Theme::Dark,
            Some(Path::new("/tmp/engine.json")),
        );
        assert_eq!(value_after(&args, "--theme"), Some("dark"));
        assert_eq!(value_after(&args, "--configFile"), Some("/tmp/engine.json"));

        let args = engine.expand_args(&request("x"), Theme::Light, None);
        assert_eq!(value_after(&args, "--theme"), Some("default"));
    }

    #[test]
    fn mermaid_receives_render_id_as_svg_id() {
        let engine = CommandEngine::mermaid(&CommandsConfig::default()).unwrap();
        let flow = RenderRequest {
            render_id: "flow_content".to_string(),
            ..request("graph TD; A-->B")
        };
        let args = engine.expand_args(&flow, Theme::Light, None);
        assert_eq!(value_after(&args, "--svgId"), Some("flow_content"));
    }

    #[test]
    fn graphviz_command_takes_no_config_file() {
        let engine = CommandEngine::graphviz(&CommandsConfig::default()).unwrap();
        assert!(!engine.wants_config());
        assert_eq!(
            engine.expand_args(&request("A->B"), Theme::Dark, None),
            vec!["-Tsvg".to_string()]
        );
    }

    #[test]
    fn config_file_holds_configured_options() {
        let options = EngineOptions {
            security_level: "strict".to_string(),
            use_max_width: true,
            ..EngineOptions::default()
        };
        let file = write_config(&options, Theme::Dark).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(written, options.engine_config(Theme::Dark));
        assert_ne!(written, EngineOptions::default().engine_config(Theme::Dark));
    }

    #[test]
    fn oversized_description_rejected_without_spawning() {
        let engine = CommandEngine::new(&["definitely-not-an-engine".to_string()]).unwrap();
        engine.configure(&EngineOptions {
            max_text_size: 3,
            ..EngineOptions::default()
        });
        let result = block_on(engine.render(request("A->B")));
        assert_eq!(result, Err(EngineError::TextTooLarge { len: 4, max: 3 }));
    }

    #[test]
    fn missing_program_reports_spawn_error() {
        let engine = CommandEngine::new(&["definitely-not-an-engine".to_string()]).unwrap();
        let result = block_on(engine.render(request("A->B")));
        assert!(matches!(result, Err(EngineError::Spawn { program, .. }) if program == "definitely-not-an-engine"));
    }

    #[cfg(unix)]
    #[test]
    fn echoes_stdout_and_surfaces_stderr_on_failure() {
        let cat = CommandEngine::new(&["cat".to_string()]).unwrap();
        assert_eq!(block_on(cat.render(request("<svg/>"))), Ok("<svg/>".to_string()));

        let failing = CommandEngine::new(&[
            "sh".to_string(),
            "-c".to_string(),
            "echo 'syntax error' >&2; exit 1".to_string(),
        ])
        .unwrap();
        assert_eq!(
            block_on(failing.render(request("A->"))),
            Err(EngineError::Rejected("syntax error".to_string()))
        );
    }

    #[cfg(unix)]
    #[test]
    fn configure_reaches_the_engine_process() {
        let engine = CommandEngine::new(&[
            "sh".to_string(),
            "-c".to_string(),
            "cat \"$1\"".to_string(),
            "sh".to_string(),
            CONFIG_PLACEHOLDER.to_string(),
        ])
        .unwrap();
        engine.configure(&EngineOptions {
            security_level: "strict".to_string(),
            use_max_width: true,
            ..EngineOptions::default()
        });

        let output = block_on(engine.render(request("graph TD; A-->B"))).unwrap();
        let config: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(config["securityLevel"], "strict");
        assert_eq!(config["flowchart"]["useMaxWidth"], true);
        assert_eq!(config["theme"], "dark");
    }
}
