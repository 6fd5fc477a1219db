//! Table output for each command.

use std::path::Path;

use bastion_cli::commands::CleanSummary;
use bastion_persistence::orchestrator::SaveFileInfo;
use bastion_persistence::{
    RecoveryReport, SaveOperationResult, Severity, ValidationIssue, VerificationReport,
};
use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

pub fn print_list(saves: &[SaveFileInfo]) {
    if saves.is_empty() {
        println!("No saves found.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Save"),
        header_cell("Version"),
        header_cell("Saved at"),
        header_cell("Size"),
        header_cell("Codec"),
        header_cell("Systems"),
        header_cell("Backups"),
        header_cell("Status"),
    ]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 3, CellAlignment::Right);
    align_column(&mut table, 5, CellAlignment::Right);
    align_column(&mut table, 6, CellAlignment::Right);
    align_column(&mut table, 7, CellAlignment::Center);

    let mut total_size = 0u64;
    for save in saves {
        total_size += save.size;
        table.add_row(vec![
            Cell::new(&save.filename)
                .fg(Color::Blue)
                .add_attribute(Attribute::Bold),
            optional_cell(save.version.as_ref()),
            optional_cell(save.saved_at.map(|t| t.format("%Y-%m-%d %H:%M:%S"))),
            Cell::new(format_bytes(save.size)),
            optional_cell(save.algorithm),
            Cell::new(save.systems.len()),
            Cell::new(save.backups),
            status_cell(save.intact),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        dim_cell("-"),
        dim_cell("-"),
        Cell::new(format_bytes(total_size)).add_attribute(Attribute::Bold),
        dim_cell("-"),
        dim_cell("-"),
        dim_cell("-"),
        dim_cell(format!("{} saves", saves.len())),
    ]);
    println!("{table}");
}

pub fn print_info(info: &SaveFileInfo) {
    let mut table = key_value_table();
    add_field(&mut table, "Path", display_path(&info.path));
    add_field(&mut table, "Size", format_bytes(info.size));
    if let Some(original) = info.original_size {
        add_field(&mut table, "Uncompressed", format_bytes(original));
    }
    add_optional(&mut table, "Codec", info.algorithm);
    add_optional(&mut table, "Version", info.version.as_ref());
    add_optional(
        &mut table,
        "Saved at",
        info.saved_at.map(|t| t.to_rfc3339()),
    );
    add_optional(
        &mut table,
        "Modified",
        info.modified.map(|t| t.to_rfc3339()),
    );
    add_field(&mut table, "Systems", list_or_dash(&info.systems));
    add_field(&mut table, "Backups", info.backups);
    table.add_row(vec![header_cell("Status"), status_cell(info.intact)]);
    println!("{table}");
}

pub fn print_verification(report: &VerificationReport) {
    println!("{}", report.path.display());
    let mut table = key_value_table();
    table.add_row(vec![header_cell("Result"), status_cell(report.is_valid())]);
    add_field(&mut table, "Size", format_bytes(report.file_size));
    add_optional(&mut table, "Codec", report.algorithm);
    add_optional(&mut table, "Version", report.version.as_ref());
    table.add_row(vec![header_cell("Structure"), check_cell(Some(report.structure_ok))]);
    table.add_row(vec![
        header_cell("Frame CRC"),
        check_cell(Some(report.frame_checksum_ok)),
    ]);
    table.add_row(vec![
        header_cell("Content SHA-256"),
        check_cell(report.content_checksum_ok),
    ]);
    add_field(&mut table, "Systems", list_or_dash(&report.systems));
    if report.migration_required {
        add_field(&mut table, "Migration", list_or_dash(&report.migration_path));
    }
    add_field(&mut table, "SHA-256", &report.file_digest);
    println!("{table}");

    print_issue_table(report.validation.issues());
    for error in &report.errors {
        eprintln!("- {error}");
    }
    for note in &report.notes {
        println!("  {note}");
    }
}

fn print_issue_table(issues: &[ValidationIssue]) {
    if issues.is_empty() {
        return;
    }
    let mut sorted: Vec<&ValidationIssue> = issues.iter().collect();
    sorted.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.field_path.cmp(&b.field_path))
    });
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Severity"),
        header_cell("Validator"),
        header_cell("Field"),
        header_cell("Message"),
        header_cell("Fix"),
    ]);
    apply_issue_table_style(&mut table);
    align_column(&mut table, 0, CellAlignment::Center);
    for issue in sorted {
        table.add_row(vec![
            severity_cell(issue.severity),
            Cell::new(&issue.validator),
            Cell::new(&issue.field_path),
            Cell::new(&issue.message),
            optional_cell(issue.suggested_fix.as_deref()),
        ]);
    }
    println!("Issues:");
    println!("{table}");
}

pub fn print_recovery(report: &RecoveryReport) {
    if report.is_clean() && report.backups_removed == 0 {
        println!("Nothing to recover.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![header_cell("Action"), header_cell("File"), header_cell("Detail")]);
    apply_table_style(&mut table);
    for temp in &report.temp_files_removed {
        table.add_row(vec![
            Cell::new("removed temp").fg(Color::Yellow),
            Cell::new(display_name(temp)),
            dim_cell("-"),
        ]);
    }
    for restored in &report.restored {
        table.add_row(vec![
            Cell::new("restored").fg(Color::Green),
            Cell::new(display_name(&restored.path)),
            Cell::new(format!("from {}", display_name(&restored.backup))),
        ]);
    }
    for lost in &report.unrecoverable {
        table.add_row(vec![
            Cell::new("unrecoverable")
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
            Cell::new(display_name(&lost.path)),
            Cell::new(&lost.reason),
        ]);
    }
    if report.backups_removed > 0 {
        table.add_row(vec![
            Cell::new("rotated backups").fg(Color::Cyan),
            dim_cell("-"),
            Cell::new(format!("{} removed", report.backups_removed)),
        ]);
    }
    println!("{table}");
}

pub fn print_clean(summary: &CleanSummary) {
    println!(
        "Removed {} temp file(s) and {} backup(s), keeping {} per save.",
        summary.temp_files_removed.len(),
        summary.backups_removed,
        summary.keep
    );
}

pub fn print_backups(file: &str, backups: &[String]) {
    if backups.is_empty() {
        println!("No backups of {file}.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![header_cell("#"), header_cell("Backup")]);
    apply_table_style(&mut table);
    align_column(&mut table, 0, CellAlignment::Right);
    for (index, name) in backups.iter().enumerate() {
        table.add_row(vec![Cell::new(index + 1), Cell::new(name)]);
    }
    println!("{table}");
}

pub fn print_restore(result: &SaveOperationResult) {
    println!("{}", result.message);
    if let Some(backup) = &result.backup_path {
        println!("Previous file kept as {}", display_name(backup));
    }
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
}

/// Human-readable byte count.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(140);
}

fn apply_issue_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(160);
}

fn key_value_table() -> Table {
    let mut table = Table::new();
    apply_table_style(&mut table);
    table
}

fn add_field(table: &mut Table, label: &str, value: impl ToString) {
    table.add_row(vec![header_cell(label), Cell::new(value)]);
}

fn add_optional<T: ToString>(table: &mut Table, label: &str, value: Option<T>) {
    table.add_row(vec![header_cell(label), optional_cell(value)]);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn status_cell(ok: bool) -> Cell {
    if ok {
        Cell::new("OK").fg(Color::Green).add_attribute(Attribute::Bold)
    } else {
        Cell::new("DAMAGED")
            .fg(Color::Red)
            .add_attribute(Attribute::Bold)
    }
}

fn check_cell(ok: Option<bool>) -> Cell {
    match ok {
        Some(true) => Cell::new("✓").fg(Color::Green).add_attribute(Attribute::Bold),
        Some(false) => Cell::new("✗").fg(Color::Red).add_attribute(Attribute::Bold),
        None => dim_cell("-"),
    }
}

fn severity_cell(severity: Severity) -> Cell {
    match severity {
        Severity::Critical => Cell::new("CRITICAL")
            .fg(Color::Red)
            .add_attribute(Attribute::Bold),
        Severity::Error => Cell::new("ERROR").fg(Color::Red),
        Severity::Warning => Cell::new("WARN").fg(Color::Yellow),
    }
}

fn optional_cell<T: ToString>(value: Option<T>) -> Cell {
    match value {
        Some(value) => Cell::new(value),
        None => dim_cell("-"),
    }
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
