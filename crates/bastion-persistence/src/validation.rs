//! Validation issues, reports and save document validators.
//!
//! Validators never abort an operation on their own: every finding is
//! collected into a [`ValidationReport`] and the caller decides from
//! [`ValidationReport::is_valid`] whether the document is usable.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::tree::TreeValue;
use crate::version::SaveVersion;

/// Issue severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Should review
    Warning,
    /// Document cannot be used as-is
    Error,
    /// Document structure is broken
    Critical,
}

impl Severity {
    /// Parse severity from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
        }
    }

    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Name of the validator that produced the issue.
    pub validator: String,
    /// Location inside the document, e.g. `systems.economy`.
    pub field_path: String,
    pub message: String,
    pub suggested_fix: Option<String>,
}

impl ValidationIssue {
    pub fn new(
        severity: Severity,
        validator: impl Into<String>,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            validator: validator.into(),
            field_path: field_path.into(),
            message: message.into(),
            suggested_fix: None,
        }
    }

    pub fn warning(
        validator: impl Into<String>,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, validator, field_path, message)
    }

    pub fn error(
        validator: impl Into<String>,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Error, validator, field_path, message)
    }

    pub fn critical(
        validator: impl Into<String>,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Critical, validator, field_path, message)
    }

    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// Collected issues from one or more validators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
    validators_run: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.issues.extend(issues);
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
        for name in other.validators_run {
            self.record_validator(name);
        }
    }

    /// Remember that a validator ran, even if it found nothing.
    pub fn record_validator(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.validators_run.contains(&name) {
            self.validators_run.push(name);
        }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn validators_run(&self) -> &[String] {
        &self.validators_run
    }

    /// No error or critical issues.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity.is_blocking())
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn critical_count(&self) -> usize {
        self.count(Severity::Critical)
    }

    /// Errors plus criticals.
    pub fn blocking_count(&self) -> usize {
        self.error_count() + self.critical_count()
    }

    pub fn by_validator<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ValidationIssue> {
        self.issues.iter().filter(move |i| i.validator == name)
    }

    /// Plain-text rendering for logs and CLI output.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let status = if self.is_valid() { "VALID" } else { "INVALID" };
        let _ = writeln!(
            out,
            "Validation: {status} ({} critical, {} error(s), {} warning(s))",
            self.critical_count(),
            self.error_count(),
            self.warning_count()
        );
        if !self.validators_run.is_empty() {
            let _ = writeln!(out, "Validators: {}", self.validators_run.join(", "));
        }
        let mut sorted: Vec<&ValidationIssue> = self.issues.iter().collect();
        sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
        for issue in sorted {
            let _ = writeln!(
                out,
                "  [{}] {} ({}): {}",
                issue.severity.label(),
                issue.field_path,
                issue.validator,
                issue.message
            );
            if let Some(fix) = &issue.suggested_fix {
                let _ = writeln!(out, "      fix: {fix}");
            }
        }
        out
    }
}

/// Information validators may need besides the document.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Names of the systems registered with the orchestrator.
    pub expected_systems: &'a [String],
    pub current_version: &'a SaveVersion,
}

/// A named check over a decoded save document.
pub trait SaveValidator: Send + Sync {
    fn validate(&self, document: &TreeValue, context: &ValidationContext<'_>)
    -> Vec<ValidationIssue>;
}

impl<F> SaveValidator for F
where
    F: Fn(&TreeValue, &ValidationContext<'_>) -> Vec<ValidationIssue> + Send + Sync,
{
    fn validate(
        &self,
        document: &TreeValue,
        context: &ValidationContext<'_>,
    ) -> Vec<ValidationIssue> {
        self(document, context)
    }
}

/// Name of the built-in document shape validator.
pub const STRUCTURE_VALIDATOR: &str = "structure";

/// Name of the built-in registered-systems validator.
pub const SYSTEMS_VALIDATOR: &str = "systems";

/// Checks the document envelope: header, version, systems map, checksum.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructureValidator;

impl SaveValidator for StructureValidator {
    fn validate(
        &self,
        document: &TreeValue,
        context: &ValidationContext<'_>,
    ) -> Vec<ValidationIssue> {
        const NAME: &str = STRUCTURE_VALIDATOR;
        let mut issues = Vec::new();

        if !document.is_object() {
            issues.push(ValidationIssue::critical(
                NAME,
                "$",
                format!("document root is {}, expected object", document.type_name()),
            ));
            return issues;
        }

        match document.get("header") {
            Some(header) if header.is_object() => {
                match header.get("version").and_then(TreeValue::as_str) {
                    Some(version) => match version.parse::<SaveVersion>() {
                        Ok(v) if !v.is_compatible_with(context.current_version) => {
                            issues.push(ValidationIssue::warning(
                                NAME,
                                "header.version",
                                format!(
                                    "version {v} has a different major than {}",
                                    context.current_version
                                ),
                            ));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            issues.push(ValidationIssue::critical(NAME, "header.version", e.to_string()))
                        }
                    },
                    None => issues.push(ValidationIssue::critical(
                        NAME,
                        "header.version",
                        "missing save version",
                    )),
                }
                if header.get("timestamp").and_then(TreeValue::as_str).is_none() {
                    issues.push(ValidationIssue::warning(
                        NAME,
                        "header.timestamp",
                        "missing save timestamp",
                    ));
                }
            }
            Some(other) => issues.push(ValidationIssue::critical(
                NAME,
                "header",
                format!("header is {}, expected object", other.type_name()),
            )),
            None => issues.push(ValidationIssue::critical(NAME, "header", "missing header")),
        }

        match document.get("systems") {
            Some(systems) if systems.is_object() => {}
            Some(other) => issues.push(ValidationIssue::error(
                NAME,
                "systems",
                format!("systems is {}, expected object", other.type_name()),
            )),
            None => issues.push(ValidationIssue::error(NAME, "systems", "missing systems map")),
        }

        match document.get("checksum").and_then(TreeValue::as_str) {
            Some(sum) if sum.len() == 64 && sum.chars().all(|c| c.is_ascii_hexdigit()) => {}
            Some(_) => issues.push(ValidationIssue::error(
                NAME,
                "checksum",
                "checksum is not a SHA-256 hex digest",
            )),
            None => issues.push(
                ValidationIssue::warning(NAME, "checksum", "document has no content checksum")
                    .with_fix("Re-save the file to add a checksum."),
            ),
        }

        issues
    }
}

/// Checks that every registered system has data and flags unknown ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemsValidator;

impl SaveValidator for SystemsValidator {
    fn validate(
        &self,
        document: &TreeValue,
        context: &ValidationContext<'_>,
    ) -> Vec<ValidationIssue> {
        const NAME: &str = SYSTEMS_VALIDATOR;
        let Some(systems) = document.get("systems").and_then(TreeValue::as_object) else {
            return Vec::new();
        };

        let mut issues = Vec::new();
        for expected in context.expected_systems {
            match systems.iter().find(|(name, _)| name == expected) {
                None => issues.push(
                    ValidationIssue::warning(
                        NAME,
                        format!("systems.{expected}"),
                        "registered system has no saved data",
                    )
                    .with_fix("The system will keep its current in-memory state."),
                ),
                Some((_, value)) if value.is_null() => issues.push(ValidationIssue::warning(
                    NAME,
                    format!("systems.{expected}"),
                    "saved data is null",
                )),
                Some(_) => {}
            }
        }
        for (name, _) in systems {
            if !context.expected_systems.contains(name) {
                issues.push(ValidationIssue::warning(
                    NAME,
                    format!("systems.{name}"),
                    "data for a system that is not registered will be ignored",
                ));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(systems: &'a [String], version: &'a SaveVersion) -> ValidationContext<'a> {
        ValidationContext {
            expected_systems: systems,
            current_version: version,
        }
    }

    fn document() -> TreeValue {
        TreeValue::object()
            .with(
                "header",
                TreeValue::object()
                    .with("version", "1.0.0")
                    .with("timestamp", "2026-01-01T00:00:00Z"),
            )
            .with("systems", TreeValue::object().with("economy", 1))
            .with("checksum", "a".repeat(64))
    }

    #[test]
    fn test_report_validity() {
        let mut report = ValidationReport::new();
        report.push(ValidationIssue::warning("x", "a", "meh"));
        assert!(report.is_valid());
        report.push(ValidationIssue::error("x", "b", "bad"));
        assert!(!report.is_valid());
        assert_eq!(report.blocking_count(), 1);
        assert_eq!(report.by_validator("x").count(), 2);
    }

    #[test]
    fn test_report_text_lists_critical_first() {
        let mut report = ValidationReport::new();
        report.record_validator("structure");
        report.push(ValidationIssue::warning("structure", "a", "first"));
        report.push(ValidationIssue::critical("structure", "b", "second").with_fix("redo"));
        let text = report.to_text();
        assert!(text.starts_with("Validation: INVALID"));
        let critical_at = text.find("[Critical]").unwrap();
        let warning_at = text.find("[Warning]").unwrap();
        assert!(critical_at < warning_at);
        assert!(text.contains("fix: redo"));
    }

    #[test]
    fn test_structure_accepts_well_formed_document() {
        let version = SaveVersion::new(1, 0, 0);
        let issues = StructureValidator.validate(&document(), &context(&[], &version));
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn test_structure_rejects_missing_header() {
        let version = SaveVersion::new(1, 0, 0);
        let mut doc = document();
        doc.remove("header");
        let issues = StructureValidator.validate(&doc, &context(&[], &version));
        assert!(issues.iter().any(|i| i.severity == Severity::Critical));
    }

    #[test]
    fn test_structure_rejects_non_object_root() {
        let version = SaveVersion::new(1, 0, 0);
        let issues = StructureValidator.validate(&TreeValue::from(3), &context(&[], &version));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn test_systems_missing_and_unknown_are_warnings() {
        let version = SaveVersion::new(1, 0, 0);
        let expected = vec!["economy".to_string(), "diplomacy".to_string()];
        let mut doc = document();
        doc.get_mut("systems").unwrap().insert("legacy", 0);
        let issues = SystemsValidator.validate(&doc, &context(&expected, &version));
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == Severity::Warning));
        assert!(issues.iter().any(|i| i.field_path == "systems.diplomacy"));
        assert!(issues.iter().any(|i| i.field_path == "systems.legacy"));
    }

    #[test]
    fn test_closure_validator() {
        let version = SaveVersion::new(1, 0, 0);
        let validator = |doc: &TreeValue, _: &ValidationContext<'_>| {
            if doc.get("systems").and_then(|s| s.get("economy")).is_some() {
                Vec::new()
            } else {
                vec![ValidationIssue::error("custom", "systems.economy", "missing")]
            }
        };
        assert!(validator.validate(&document(), &context(&[], &version)).is_empty());
    }
}
