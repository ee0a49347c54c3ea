//! Interface de terminal do jobwarden: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente a
//! execução de um lote de jobs no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::registry::HealthSnapshot;
use crate::results::JobResults;
use crate::state_machine::{Job, JobStatus};
use crate::validator::{ArtifactCheck, Repair, StageOutcome, ValidationReport};

/// Indicador visual de progresso para um lote de jobs.
///
/// Exibe um spinner animado enquanto há jobs pendentes e uma linha
/// colorida por job concluído: verde para sucesso, vermelho para falha.
pub struct RunProgress {
    pb: ProgressBar,
    total: usize,
    done: usize,
    styles: Styles,
}

struct Styles {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl RunProgress {
    /// Inicia o spinner para `total` jobs.
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        let progress = Self {
            pb,
            total,
            done: 0,
            styles: Styles::new(),
        };
        progress.refresh();
        progress
    }

    fn refresh(&self) {
        self.pb
            .set_message(format!("RUNNING: {}/{} job(s) finished", self.done, self.total));
    }

    /// Registra um job terminal acima do spinner.
    pub fn job_finished(&mut self, job: &Job) {
        self.done += 1;
        self.pb.println(job_line(&self.styles, job));
        self.refresh();
    }

    /// Finaliza o spinner.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

fn job_line(styles: &Styles, job: &Job) -> String {
    match job.status {
        JobStatus::Completed => format!(
            "  {} {} completed in {} attempt(s)",
            styles.green.apply_to("✓"),
            job.name,
            job.attempts
        ),
        JobStatus::Failed => format!(
            "  {} {} failed: {}",
            styles.red.apply_to("✗"),
            job.name,
            job.error_message.as_deref().unwrap_or("unknown error")
        ),
        status => format!("  {} {} is {status}", styles.yellow.apply_to("…"), job.name),
    }
}

/// Imprime os artefatos e a tradução de um job terminal.
pub fn print_results(results: &JobResults) {
    let styles = Styles::new();
    let header = match results.status {
        JobStatus::Completed => &styles.green,
        JobStatus::Failed => &styles.red,
        _ => &styles.yellow,
    };
    println!();
    println!(
        "{}",
        header.apply_to(format!("─── {} ({}) ───", results.job_name, results.status))
    );
    for (stage, files) in &results.tasks {
        let names: Vec<&str> = files.keys().map(String::as_str).collect();
        let listing = if names.is_empty() {
            styles.dim.apply_to("(empty)".to_string()).to_string()
        } else {
            names.join(", ")
        };
        println!("  {:<14} {listing}", stage.as_str());
    }
    if let Some(translation) = &results.translation {
        println!(
            "  {} {} ({})",
            styles.green.apply_to("→"),
            translation.filename,
            translation.format
        );
        if let Some(rationale) = &translation.rationale {
            println!("    {}", styles.dim.apply_to(rationale));
        }
    }
}

/// Imprime o resultado por estágio de uma validação.
pub fn print_validation(job_name: &str, report: &ValidationReport) {
    let styles = Styles::new();
    println!("Validation of {job_name} (format: {})", report.format);
    for outcome in &report.outcomes {
        println!("{}", outcome_line(&styles, outcome));
    }
}

fn outcome_line(styles: &Styles, outcome: &StageOutcome) -> String {
    let mark = if outcome.verified {
        styles.green.apply_to("✓")
    } else {
        styles.red.apply_to("✗")
    };
    let detail = match (&outcome.repair, outcome.check) {
        (Some(Repair::ExtensionRenamed { from, .. }), _) => format!("renamed from {from}"),
        (Some(Repair::FallbackSynthesized { .. }), _) => "fallback synthesized".to_string(),
        (None, ArtifactCheck::Present) => String::new(),
        (None, check) => format!("{check:?}").to_lowercase(),
    };
    format!(
        "  {mark} {:<14} {} {}",
        outcome.stage.as_str(),
        outcome.filename,
        styles.yellow.apply_to(detail)
    )
}

/// Imprime os contadores agregados de saúde.
pub fn print_health(health: &HealthSnapshot) {
    let styles = Styles::new();
    println!(
        "{}",
        styles.dim.apply_to(format!(
            "completed: {}  failed: {}  fallbacks: {}  renames: {}",
            health.jobs_completed,
            health.jobs_failed,
            health.fallbacks_synthesized,
            health.extensions_repaired
        ))
    );
}
