//! Generated-CLI artifact producer
//!
//! Introspects one server, derives per-tool flag surfaces from the input
//! schemas, and emits a standalone JavaScript client that does not depend
//! on this runtime. Optional bundle/compile steps shell out to the target
//! runtime's bundler. Every artifact gets a `<artifact>.mcporter.json`
//! sidecar from which `generate --from` can reproduce it.

use crate::config::{ConfigLoader, LoadOptions};
use crate::model::{
    ArtifactInfo, ArtifactInvocation, ArtifactKind, ArtifactServerInfo, CliArtifactMetadata,
    GeneratorInfo, SchemaSnapshot, ServerDefinition, SourceKind, SourceRef, ToolDescriptor,
    artifact_metadata_path,
};
use crate::runtime::{ListToolsOptions, Runtime};
use crate::{McporterError, Result, constants};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub mod template;

/// Inputs for one generation run
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub server_ref: String,
    pub config_path: Option<PathBuf>,
    pub root_dir: Option<PathBuf>,
    /// Target runtime for the emitted client: node, bun, or deno
    pub runtime: String,
    pub output: Option<PathBuf>,
    pub bundle: bool,
    pub compile: bool,
    pub timeout_ms: u64,
    pub minify: bool,
    pub dry_run: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            server_ref: String::new(),
            config_path: None,
            root_dir: None,
            runtime: "node".to_string(),
            output: None,
            bundle: false,
            compile: false,
            timeout_ms: constants::DEFAULT_CALL_TIMEOUT_MS,
            minify: false,
            dry_run: false,
        }
    }
}

/// One flag on a generated subcommand
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOption {
    pub name: String,
    pub cli_name: String,
    #[serde(rename = "type")]
    pub kind: OptionKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    String,
    Number,
    Boolean,
    Array,
    Unknown,
}

/// A tool with its derived CLI surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTool {
    pub name: String,
    pub cli_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub options: Vec<ToolOption>,
}

/// What one run produced
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub artifacts: Vec<(PathBuf, ArtifactKind)>,
    pub metadata: CliArtifactMetadata,
    /// Set on dry runs instead of writing anything
    pub planned_command: Option<String>,
}

// ============================================================================
// SERVER REF RESOLUTION
// ============================================================================

/// `serverRef` accepts an inline JSON definition, a config-file path
/// (first entry wins), or a registered server name.
pub fn resolve_server_ref(server_ref: &str, opts: &LoadOptions) -> Result<ServerDefinition> {
    let trimmed = server_ref.trim();

    if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| McporterError::usage(format!("invalid inline definition: {e}")))?;
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("inline")
            .to_string();
        let entry = crate::config::parse_raw_entry(&name, value)?;
        let source = SourceRef {
            kind: SourceKind::Local,
            path: PathBuf::from("<inline>"),
        };
        return crate::config::materialize(&name, &entry, source.clone(), vec![source]);
    }

    let as_path = Path::new(trimmed);
    if as_path.exists() && as_path.is_file() {
        let mut loader = ConfigLoader::new();
        let defs = loader.load(&LoadOptions {
            config_path: Some(as_path.to_path_buf()),
            root_dir: opts.root_dir.clone(),
        })?;
        return defs.into_iter().next().ok_or_else(|| {
            McporterError::usage(format!("no servers defined in {}", as_path.display()))
        });
    }

    let mut loader = ConfigLoader::new();
    let defs = loader.load(opts)?;
    defs.into_iter()
        .find(|d| d.name == trimmed)
        .ok_or_else(|| McporterError::UnknownServer(trimmed.to_string()))
}

// ============================================================================
// OPTION DERIVATION
// ============================================================================

/// Walk an object-shaped input schema into flag descriptors. Non-object
/// schemas yield no options.
pub fn derive_options(input_schema: Option<&Value>) -> Vec<ToolOption> {
    let Some(schema) = input_schema else {
        return Vec::new();
    };
    if schema.get("type").and_then(Value::as_str).unwrap_or("object") != "object" {
        return Vec::new();
    }
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| {
            let kind = match prop.get("type").and_then(Value::as_str) {
                Some("string") => OptionKind::String,
                Some("number") | Some("integer") => OptionKind::Number,
                Some("boolean") => OptionKind::Boolean,
                Some("array") => OptionKind::Array,
                _ => OptionKind::Unknown,
            };
            // Enums live on the property or on array items
            let enum_values = prop
                .get("enum")
                .or_else(|| prop.pointer("/items/enum"))
                .and_then(Value::as_array)
                .cloned();
            ToolOption {
                name: name.clone(),
                cli_name: kebab_case(name),
                kind,
                required: required.contains(&name.as_str()),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                enum_values,
                default: prop.get("default").cloned(),
                example_value: prop
                    .get("examples")
                    .and_then(Value::as_array)
                    .and_then(|e| e.first())
                    .cloned(),
                format_hint: prop
                    .get("format")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }
        })
        .collect()
}

/// `teamId` → `team-id`, `output_path` → `output-path`
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == ' ' {
            out.push('-');
            prev_lower = false;
        } else if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

pub fn generated_tools(tools: &[ToolDescriptor]) -> Vec<GeneratedTool> {
    tools
        .iter()
        .map(|tool| GeneratedTool {
            name: tool.name.clone(),
            cli_name: kebab_case(&tool.name),
            description: tool.description.clone(),
            options: derive_options(tool.input_schema.as_ref()),
        })
        .collect()
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Run the full pipeline against a live server.
pub async fn generate(opts: &GenerateOptions) -> Result<GenerateOutcome> {
    let load = LoadOptions {
        config_path: opts.config_path.clone(),
        root_dir: opts.root_dir.clone(),
    };
    let def = resolve_server_ref(&opts.server_ref, &load)?;

    // Throwaway runtime: introspect, then tear down
    let runtime = Runtime::new(vec![def.clone()]);
    let tools = runtime
        .list_tools(
            &def.name,
            ListToolsOptions {
                include_schema: true,
                auto_authorize: true,
            },
        )
        .await?;
    runtime.close(None).await;

    generate_from_tools(opts, &def, &tools).await
}

/// Template/bundle/metadata stage, separated so `--from` and tests can
/// inject the tool list.
pub async fn generate_from_tools(
    opts: &GenerateOptions,
    def: &ServerDefinition,
    tools: &[ToolDescriptor],
) -> Result<GenerateOutcome> {
    let template_path = opts
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("generated").join(format!("{}-cli.mjs", def.name)));

    if opts.dry_run {
        let planned = equivalent_command(opts, def);
        return Ok(GenerateOutcome {
            artifacts: Vec::new(),
            metadata: build_metadata(opts, def, &template_path, ArtifactKind::Template),
            planned_command: Some(planned),
        });
    }

    let generated = generated_tools(tools);
    let snapshot = SchemaSnapshot::from_tools(tools);
    let source = template::render(def, &generated, &snapshot, &opts.runtime)?;

    if let Some(parent) = template_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&template_path, source)?;
    let mut artifacts = vec![(template_path.clone(), ArtifactKind::Template)];

    if opts.bundle || opts.compile {
        let kind = if opts.compile {
            ArtifactKind::Binary
        } else {
            ArtifactKind::Bundle
        };
        let bundled = run_bundler(opts, &template_path).await?;
        artifacts.push((bundled, kind));
    }

    // Sidecar metadata alongside every artifact
    let mut primary_metadata = None;
    for (path, kind) in &artifacts {
        let metadata = build_metadata(opts, def, path, *kind);
        std::fs::write(
            artifact_metadata_path(path),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        primary_metadata.get_or_insert(metadata);
    }

    Ok(GenerateOutcome {
        metadata: primary_metadata
            .unwrap_or_else(|| build_metadata(opts, def, &template_path, ArtifactKind::Template)),
        artifacts,
        planned_command: None,
    })
}

/// Reproduce a generation from its sidecar metadata.
pub fn options_from_metadata(metadata: &CliArtifactMetadata) -> GenerateOptions {
    let invocation = &metadata.invocation;
    GenerateOptions {
        server_ref: invocation.server_ref.clone(),
        config_path: invocation.config_path.clone(),
        root_dir: invocation.root_dir.clone(),
        runtime: invocation.runtime.clone(),
        output: invocation.output_path.clone(),
        bundle: invocation.bundle,
        compile: invocation.compile,
        timeout_ms: invocation.timeout_ms,
        minify: invocation.minify,
        dry_run: false,
    }
}

/// Read sidecar metadata given either the artifact or the sidecar path.
pub fn inspect(path: &Path) -> Result<CliArtifactMetadata> {
    let metadata_path = if path
        .to_string_lossy()
        .ends_with(constants::ARTIFACT_METADATA_SUFFIX)
    {
        path.to_path_buf()
    } else {
        artifact_metadata_path(path)
    };
    let content = std::fs::read_to_string(&metadata_path).map_err(|e| {
        McporterError::usage(format!(
            "cannot read artifact metadata {}: {e}",
            metadata_path.display()
        ))
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn build_metadata(
    opts: &GenerateOptions,
    def: &ServerDefinition,
    artifact: &Path,
    kind: ArtifactKind,
) -> CliArtifactMetadata {
    CliArtifactMetadata {
        schema_version: 1,
        generated_at: Utc::now(),
        generator: GeneratorInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        server: ArtifactServerInfo {
            name: def.name.clone(),
            source: def.source.clone(),
            definition: def.clone(),
        },
        artifact: ArtifactInfo {
            path: artifact.to_path_buf(),
            kind,
        },
        invocation: ArtifactInvocation {
            server_ref: opts.server_ref.clone(),
            config_path: opts.config_path.clone(),
            root_dir: opts.root_dir.clone(),
            runtime: opts.runtime.clone(),
            output_path: opts.output.clone(),
            bundle: opts.bundle,
            compile: opts.compile,
            timeout_ms: opts.timeout_ms,
            minify: opts.minify,
        },
    }
}

/// The command line a dry run prints.
pub fn equivalent_command(opts: &GenerateOptions, def: &ServerDefinition) -> String {
    let mut parts = vec![
        "mcporter".to_string(),
        "generate-cli".to_string(),
        def.name.clone(),
    ];
    if let Some(config) = &opts.config_path {
        parts.push(format!("--config {}", config.display()));
    }
    if opts.runtime != "node" {
        parts.push(format!("--runtime {}", opts.runtime));
    }
    if let Some(output) = &opts.output {
        parts.push(format!("--output {}", output.display()));
    }
    if opts.bundle {
        parts.push("--bundle".to_string());
    }
    if opts.compile {
        parts.push("--compile".to_string());
    }
    if opts.minify {
        parts.push("--minify".to_string());
    }
    parts.join(" ")
}

/// Shell out to the runtime-appropriate bundler.
async fn run_bundler(opts: &GenerateOptions, template: &Path) -> Result<PathBuf> {
    let out = if opts.compile {
        template.with_extension("")
    } else {
        template.with_extension("bundle.mjs")
    };
    let mut command = match opts.runtime.as_str() {
        "bun" => {
            let mut c = tokio::process::Command::new("bun");
            c.arg("build").arg(template);
            if opts.compile {
                c.arg("--compile");
            }
            if opts.minify {
                c.arg("--minify");
            }
            c.arg("--outfile").arg(&out);
            c
        }
        "deno" => {
            let mut c = tokio::process::Command::new("deno");
            if opts.compile {
                c.arg("compile").arg("--output").arg(&out).arg(template);
            } else {
                c.arg("bundle").arg(template).arg(&out);
            }
            c
        }
        _ => {
            let mut c = tokio::process::Command::new("npx");
            c.arg("esbuild")
                .arg(template)
                .arg("--bundle")
                .arg("--platform=node")
                .arg(format!("--outfile={}", out.display()));
            if opts.minify {
                c.arg("--minify");
            }
            c
        }
    };
    let status = command.status().await.map_err(|e| {
        McporterError::usage(format!(
            "bundler for runtime '{}' not available: {e}",
            opts.runtime
        ))
    })?;
    if !status.success() {
        return Err(McporterError::internal(format!(
            "bundler exited with {status}"
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod generate_test {
    include!("generate_test.rs");
}
