//! Macro expansion pass applied before a chain enters the interpreter.
//!
//! Scans the four templated string fields of every task (plus hook-call
//! argument values) for `{{namespace}}` / `{{namespace:payload}}` tokens and
//! substitutes them. Known namespaces: `hookservice`, `var`, `now`, `chain`.
//! Everything else — including ordinary template expressions like
//! `{{ input }}` — passes through verbatim for the template pass to handle.
//!
//! Expansion works on a deep clone; the caller's chain is never mutated.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::chain::definition::{TaskChainDefinition, TaskDefinition};
use crate::context::ExecContext;
use crate::error::EngineError;
use crate::hooks::HookRegistry;

/// Expands macros in every task of `chain`, returning the rewritten clone.
pub async fn expand_chain(
    ctx: &ExecContext,
    registry: &dyn HookRegistry,
    chain: &TaskChainDefinition,
) -> Result<TaskChainDefinition, EngineError> {
    let mut expanded = chain.clone();
    for task in &mut expanded.tasks {
        expand_task(ctx, registry, &chain.id, task).await?;
    }
    Ok(expanded)
}

async fn expand_task(
    ctx: &ExecContext,
    registry: &dyn HookRegistry,
    chain_id: &str,
    task: &mut TaskDefinition,
) -> Result<(), EngineError> {
    for field in [
        &mut task.prompt_template,
        &mut task.system_instruction,
        &mut task.print,
        &mut task.output_template,
    ] {
        if let Some(text) = field {
            *text = expand_str(ctx, registry, chain_id, text).await?;
        }
    }
    if let Some(hook) = &mut task.hook {
        for value in hook.args.values_mut() {
            *value = expand_str(ctx, registry, chain_id, value).await?;
        }
    }
    Ok(())
}

/// Expands all macros in one string.
async fn expand_str(
    ctx: &ExecContext,
    registry: &dyn HookRegistry,
    chain_id: &str,
    text: &str,
) -> Result<String, EngineError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated token: keep the tail verbatim.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let token = &after[..end];
        match expand_token(ctx, registry, chain_id, token.trim()).await? {
            Some(replacement) => out.push_str(&replacement),
            None => {
                out.push_str("{{");
                out.push_str(token);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Expands one `namespace[:payload]` token. `None` means "not a macro, keep
/// verbatim".
async fn expand_token(
    ctx: &ExecContext,
    registry: &dyn HookRegistry,
    chain_id: &str,
    token: &str,
) -> Result<Option<String>, EngineError> {
    let (namespace, payload) = match token.split_once(':') {
        Some((ns, p)) => (ns.trim(), Some(p.trim())),
        None => (token, None),
    };
    match namespace {
        "hookservice" => expand_hookservice(ctx, registry, payload).await.map(Some),
        "var" => {
            let name = payload.unwrap_or("");
            Ok(Some(
                ctx.template_vars.get(name).cloned().unwrap_or_default(),
            ))
        }
        "now" => {
            let now = Utc::now();
            Ok(Some(match payload {
                Some(layout) if !layout.is_empty() => now.format(layout).to_string(),
                _ => now.to_rfc3339(),
            }))
        }
        "chain" => match payload {
            Some("id") => Ok(Some(chain_id.to_string())),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

async fn expand_hookservice(
    ctx: &ExecContext,
    registry: &dyn HookRegistry,
    payload: Option<&str>,
) -> Result<String, EngineError> {
    let payload = payload
        .filter(|p| !p.is_empty())
        .ok_or_else(|| EngineError::Template("hookservice macro requires a payload".into()))?;
    if payload == "hooks" {
        let mut names = registry.supports(ctx).await.map_err(EngineError::from)?;
        names.sort();
        return Ok(serde_json::to_string(&names)?);
    }
    if payload == "list" {
        let mut names = registry.supports(ctx).await.map_err(EngineError::from)?;
        names.sort();
        // BTreeMap keeps the rendered JSON deterministic.
        let mut listing = BTreeMap::new();
        for name in names {
            let tools = registry
                .tools_for_hook(ctx, &name)
                .await
                .map_err(EngineError::from)?;
            listing.insert(
                name,
                tools.into_iter().map(|t| t.name).collect::<Vec<_>>(),
            );
        }
        return Ok(serde_json::to_string(&listing)?);
    }
    if let Some(hook) = payload.strip_prefix("tools ") {
        let tools = registry
            .tools_for_hook(ctx, hook.trim())
            .await
            .map_err(EngineError::from)?;
        let names: Vec<String> = tools.into_iter().map(|t| t.name).collect();
        return Ok(serde_json::to_string(&names)?);
    }
    Err(EngineError::Template(format!(
        "unknown hookservice payload {payload:?}"
    )))
}
