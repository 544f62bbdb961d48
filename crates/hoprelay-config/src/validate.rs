//! Configuration validation logic.

use std::collections::HashSet;

use crate::loader::ConfigError;
use crate::types::*;

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

/// Collect names, failing on the first duplicate.
fn unique_names<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<HashSet<&'a str>, ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(invalid(format!("{} name is empty", kind)));
        }
        if !seen.insert(name) {
            return Err(invalid(format!("duplicate {} name: {}", kind, name)));
        }
    }
    Ok(seen)
}

fn check_ref(
    known: &HashSet<&str>,
    kind: &str,
    name: Option<&str>,
    owner: &str,
) -> Result<(), ConfigError> {
    match name {
        Some(name) if !known.contains(name) => Err(invalid(format!(
            "{} references unknown {} '{}'",
            owner, kind, name
        ))),
        _ => Ok(()),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.services.is_empty() {
        return Err(invalid("at least one service is required"));
    }

    unique_names("service", config.services.iter().map(|s| s.name.as_str()))?;
    let chains = unique_names("chain", config.chains.iter().map(|c| c.name.as_str()))?;
    let admissions = unique_names("admission", config.admissions.iter().map(|a| a.name.as_str()))?;
    let bypasses = unique_names("bypass", config.bypasses.iter().map(|b| b.name.as_str()))?;
    let limiters = unique_names("limiter", config.limiters.iter().map(|l| l.name.as_str()))?;
    let recorders = unique_names("recorder", config.recorders.iter().map(|r| r.name.as_str()))?;

    for svc in &config.services {
        let owner = format!("service '{}'", svc.name);
        if svc.addr.trim().is_empty() {
            return Err(invalid(format!("{}: addr is empty", owner)));
        }
        check_ref(&chains, "chain", svc.chain.as_deref(), &owner)?;
        check_ref(&admissions, "admission", svc.admission.as_deref(), &owner)?;
        check_ref(&bypasses, "bypass", svc.bypass.as_deref(), &owner)?;
        check_ref(&limiters, "limiter", svc.limiter.as_deref(), &owner)?;
        for rec in &svc.recorders {
            check_ref(&recorders, "recorder", Some(rec.name.as_str()), &owner)?;
            if rec.record != "client-address" {
                return Err(invalid(format!(
                    "{}: unsupported record kind '{}'",
                    owner, rec.record
                )));
            }
        }
        if svc.handler.relay_buffer_size == 0 {
            return Err(invalid(format!("{}: handler.relay_buffer_size must be > 0", owner)));
        }
        if svc.network == ListenNetwork::Udp {
            if svc.handler.datagram_buffer_size == 0 {
                return Err(invalid(format!(
                    "{}: handler.datagram_buffer_size must be > 0",
                    owner
                )));
            }
            if svc.udp_ttl_secs == 0 {
                return Err(invalid(format!("{}: udp_ttl_secs must be > 0", owner)));
            }
        }
        if svc.handler.retries == 0 {
            return Err(invalid(format!("{}: handler.retries must be > 0", owner)));
        }
        match &svc.handler.kind {
            HandlerKind::Forward => {
                let targets = svc.forwarder.as_ref().map(|f| f.targets.as_slice());
                match targets {
                    Some(t) if !t.is_empty() && t.iter().all(|a| !a.trim().is_empty()) => {}
                    _ => {
                        return Err(invalid(format!(
                            "{}: forward handler needs at least one forwarder target",
                            owner
                        )));
                    }
                }
            }
        }
    }

    for chain in &config.chains {
        let owner = format!("chain '{}'", chain.name);
        if chain.hops.is_empty() {
            return Err(invalid(format!("{}: has no hops", owner)));
        }
        unique_names("hop", chain.hops.iter().map(|h| h.name.as_str()))?;
        for hop in &chain.hops {
            let owner = format!("{} hop '{}'", owner, hop.name);
            if hop.nodes.is_empty() {
                return Err(invalid(format!("{}: has no nodes", owner)));
            }
            check_ref(&bypasses, "bypass", hop.bypass.as_deref(), &owner)?;
            let mut node_names = HashSet::new();
            for node in &hop.nodes {
                if node.addr.trim().is_empty() {
                    return Err(invalid(format!("{}: node addr is empty", owner)));
                }
                let id = if node.name.is_empty() { &node.addr } else { &node.name };
                if !node_names.insert(id.as_str()) {
                    return Err(invalid(format!("{}: duplicate node '{}'", owner, id)));
                }
                check_ref(&bypasses, "bypass", node.bypass.as_deref(), &owner)?;
            }
        }
    }

    for limiter in &config.limiters {
        if limiter.requests == 0 || limiter.window_secs == 0 {
            return Err(invalid(format!(
                "limiter '{}': requests and window_secs must be > 0",
                limiter.name
            )));
        }
    }

    for recorder in &config.recorders {
        if recorder.file.path.trim().is_empty() {
            return Err(invalid(format!("recorder '{}': file.path is empty", recorder.name)));
        }
    }

    if let Some(format) = &config.logging.format
        && !matches!(format.as_str(), "text" | "json")
    {
        return Err(invalid("logging.format must be 'text' or 'json'"));
    }

    Ok(())
}
