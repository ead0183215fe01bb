// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Script Template Engine
//!
//! Renders the shell templates flavors ship for node installation, using
//! Handlebars for placeholder substitution.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Turn a flavor template plus parameters into a runnable script
//! - **Integration:** `FlavorActors::node_installation_script` → `RemoteScriptRunner`
//!
//! # Parameters added by the blueprint
//!
//! - `{{ClusterName}}` - Cluster name
//! - `{{DNSServerIPs}}` - Provider DNS servers (list)
//! - `{{MasterIPs}}` - Private IPs of the masters (list)
//! - `{{CladmPassword}}` - Admin password
//! - `{{GlobalSystemRequirements}}` - Flavor-wide preamble
//!
//! # Helpers
//!
//! - `{{inc @index}}` - adds one to an integer, for 1-based numbering in loops

use handlebars::{handlebars_helper, no_escape, Handlebars};

use crate::domain::installer::InstallError;

/// Parameters handed to a script template.
pub type TemplateParams = serde_json::Map<String, serde_json::Value>;

handlebars_helper!(inc: |i: i64| i + 1);

pub struct ScriptTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl ScriptTemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Shell scripts, not HTML
        handlebars.register_escape_fn(no_escape);
        handlebars.register_helper("inc", Box::new(inc));
        Self { handlebars }
    }

    pub fn render(&self, name: &str, template: &str, params: &TemplateParams) -> Result<String, InstallError> {
        self.handlebars
            .render_template(template, params)
            .map_err(|e| InstallError::Render(format!("{}: {}", name, e)))
    }

    /// Validate template syntax without rendering
    pub fn validate_template(&self, template: &str) -> Result<(), InstallError> {
        handlebars::template::Template::compile(template)
            .map(|_| ())
            .map_err(|e| InstallError::Render(e.to_string()))
    }
}

impl Default for ScriptTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
