//! Interface de terminal do pipeline: barras de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para as barras de progresso e `console` para
//! estilização com cores. O [`ProgressDisplay`] recebe os snapshots do
//! poller e os mostra no terminal; [`transfer_hook`] mostra os bytes
//! enviados ou recebidos. As duas barras dividem um único `MultiProgress`.

use std::sync::{Mutex, PoisonError};

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use reality_pipeline::outputs::OutputResult;
use reality_pipeline::poller::ProgressObserver;
use reality_pipeline::reality::ProgressHook;
use reality_pipeline::state_machine::{JobProgress, JobState, RunRecord, RunStatus};

/// Indicador visual de progresso para um job acompanhado no terminal.
pub struct ProgressDisplay {
    // Barra de 0 a 100 do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl ProgressDisplay {
    /// Inicia a barra com o nome do job.
    pub fn start(multi: &MultiProgress, label: &str) -> Self {
        let pb = multi.add(ProgressBar::new(100));
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(format!("SUBMITTED: {label}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(200));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Exibe uma linha acima da barra sem interrompê-la.
    pub fn note(&self, message: &str) {
        self.pb.println(format!("  {} {message}", self.yellow.apply_to("•")));
    }

    /// Finaliza a barra; sucesso em verde, cancelamento em amarelo.
    pub fn finish(&self, status: RunStatus) {
        self.pb.finish_and_clear();
        match status {
            RunStatus::Completed => {
                println!("  {} Job completed", self.green.apply_to("✓"));
            }
            RunStatus::CompletedWithErrors => {
                println!(
                    "  {} Job completed, some outputs failed to download",
                    self.yellow.apply_to("!")
                );
            }
            RunStatus::Cancelled => {
                println!("  {} Job cancelled", self.yellow.apply_to("⊘"));
            }
        }
    }

    /// Finaliza a barra e exibe a causa de uma falha.
    pub fn fail(&self, error: &dyn std::fmt::Display) {
        self.pb.finish_and_clear();
        println!("  {} {error}", self.red.apply_to("✗"));
    }
}

impl ProgressObserver for ProgressDisplay {
    fn on_progress(&mut self, _job_id: &str, progress: &JobProgress) {
        self.pb.set_position(u64::from(progress.percent));
        let label = match progress.state {
            JobState::Failed => self.red.apply_to("FAILED").to_string(),
            _ => "RUNNING".to_string(),
        };
        self.pb.set_message(format!("{label}: {}", progress.step));
    }
}

/// Hook de progresso do cliente que desenha uma barra por transferência.
///
/// A barra aparece no primeiro relatório e some ao chegar a 100%. Nunca pede
/// para interromper a transferência.
pub fn transfer_hook(multi: &MultiProgress) -> ProgressHook {
    let multi = multi.clone();
    let current: Mutex<Option<ProgressBar>> = Mutex::new(None);

    ProgressHook::new(move |percent| {
        let mut current = current.lock().unwrap_or_else(PoisonError::into_inner);
        let pb = current.get_or_insert_with(|| {
            let pb = multi.add(ProgressBar::new(100));
            let style = ProgressStyle::with_template("  {bar:30.green/white} {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            pb.set_style(style);
            pb.set_message("transfer");
            pb
        });
        pb.set_position(percent.round() as u64);

        if percent >= 100.0 {
            if let Some(done) = current.take() {
                done.finish_and_clear();
                multi.remove(&done);
            }
        }
        true
    })
}

/// Lista o resultado de cada saída baixada.
pub fn print_outputs(results: &[OutputResult]) {
    let green = Style::new().green();
    let red = Style::new().red();
    for result in results {
        match result {
            Ok(done) => println!(
                "  {} {} → {} ({} files, {} bytes)",
                green.apply_to("↓"),
                done.kind,
                done.path.display(),
                done.files,
                done.bytes
            ),
            Err(err) => println!("  {} {err}", red.apply_to("✗")),
        }
    }
}

/// Imprime o registro da execução formatado em JSON com estilo colorido.
pub fn print_record(record: &RunRecord) {
    let style = match record.status {
        RunStatus::Completed => Style::new().green().bold(),
        RunStatus::CompletedWithErrors | RunStatus::Cancelled => Style::new().yellow().bold(),
    };
    println!();
    println!("{}", style.apply_to("─── Run Record ───"));
    println!("{}", serde_json::to_string_pretty(record).unwrap_or_default());
}
