use {
    anyhow::Result,
    chrono::Utc,
    salesmcp_config::SalesConfig,
    salesmcp_oauth::{HealthReport, HealthStatus, health},
};

/// Run the credential health checks. Returns whether everything is healthy.
pub fn handle_health(config: &SalesConfig, json: bool) -> Result<bool> {
    let report = health::check_all(config, Utc::now());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(report.overall_healthy)
}

fn render(report: &HealthReport) -> String {
    let mut out = String::from("Credential health\n");
    if report.checks.is_empty() {
        out.push_str("  no credentials configured\n");
    }
    for check in &report.checks {
        let tag = match check.status {
            HealthStatus::Healthy => "ok",
            HealthStatus::Warning => "warn",
            HealthStatus::Error => "error",
        };
        out.push_str(&format!("  [{tag}] {}: {}\n", check.provider, check.message));
    }
    out.push_str(if report.overall_healthy {
        "Overall: healthy\n"
    } else {
        "Overall: unhealthy\n"
    });
    out
}

#[cfg(test)]
mod tests {
    use {super::*, salesmcp_config::CredentialEntry};

    #[test]
    fn renders_missing_credential_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SalesConfig::default();
        config.credentials.providers.clear();
        config.credentials.providers.insert(
            "calendly".into(),
            CredentialEntry::at(dir.path().join("calendly_token.json")),
        );

        let report = health::check_all(&config, Utc::now());
        let text = render(&report);
        assert!(text.contains("[error] calendly:"), "{text}");
        assert!(text.ends_with("Overall: unhealthy\n"));
    }

    #[test]
    fn renders_empty_config() {
        let mut config = SalesConfig::default();
        config.credentials.providers.clear();
        let text = render(&health::check_all(&config, Utc::now()));
        assert!(text.contains("no credentials configured"));
        assert!(text.ends_with("Overall: healthy\n"));
    }
}
