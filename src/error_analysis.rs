// error_analysis.rs - Error summary for one thermalized Monte Carlo observable

use crate::autocorrelation::{
    corrected_error_for_tau, effective_size_for_tau, integrated_autocorr_time,
};
use crate::correlation::jackknife;
use crate::error::{Result, SqmError};

/// Error analysis of a time series that is already past burn-in.
///
/// tau_int is estimated once and shared by the corrected error and N_eff, so
/// both describe the same window.
#[derive(Debug, Clone)]
pub struct ErrorAnalysis {
    /// Post-thermalization series.
    data: Vec<f64>,
    /// Integrated autocorrelation time
    tau_int: f64,
    /// Effective sample size
    n_eff: f64,
    /// Standard error corrected for autocorrelation
    stat_error: f64,
    /// Jackknife error (treats samples as independent)
    jack_error: f64,
}

impl ErrorAnalysis {
    pub fn new(data: Vec<f64>) -> Result<Self> {
        let n = data.len();
        if n < 2 {
            return Err(SqmError::Statistical(format!(
                "error analysis needs at least 2 samples, got {n}"
            )));
        }
        let tau_int = integrated_autocorr_time(&data)?;
        let n_eff = effective_size_for_tau(n, tau_int);
        let (_, stat_error) = corrected_error_for_tau(&data, tau_int)?;

        let (_, jack_error) = jackknife(&data)?;

        Ok(Self { data, tau_int, n_eff, stat_error, jack_error })
    }

    /// All error estimates at once.
    pub fn errors(&self) -> ErrorEstimates {
        ErrorEstimates {
            tau_int: self.tau_int,
            n_eff: self.n_eff,
            stat_error: self.stat_error,
            jack_error: self.jack_error,
            relative_error: self.stat_error / self.mean().abs(),
        }
    }

    pub fn mean(&self) -> f64 {
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Error estimates for one observable series.
#[derive(Debug, Clone, Copy)]
pub struct ErrorEstimates {
    pub tau_int: f64,
    pub n_eff: f64,
    pub stat_error: f64,
    pub jack_error: f64,
    pub relative_error: f64,
}

/// One row of the error budget table
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    pub name: String,
    pub value: f64,
    pub stat_error: f64,
    pub jack_error: f64,
    pub tau_int: f64,
    pub n_eff: f64,
    pub burn_in: usize,
}

impl ErrorBudget {
    pub fn new(name: String, analysis: &ErrorAnalysis, burn_in: usize) -> Self {
        let errors = analysis.errors();
        Self {
            name,
            value: analysis.mean(),
            stat_error: errors.stat_error,
            jack_error: errors.jack_error,
            tau_int: errors.tau_int,
            n_eff: errors.n_eff,
            burn_in,
        }
    }

    /// One line of the error budget table.
    pub fn format_row(&self) -> String {
        format!(
            "{:<20} {:>12.6} ± {:>10.6} {:>10.6} {:>8.2} {:>8.0} {:>8}",
            self.name,
            self.value,
            self.stat_error,
            self.jack_error,
            self.tau_int,
            self.n_eff,
            self.burn_in
        )
    }
}

/// Render the error budget table.
pub fn format_error_budget_table(budgets: &[ErrorBudget]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:=<90}\n", ""));
    out.push_str("ERROR BUDGET TABLE\n");
    out.push_str(&format!("{:=<90}\n", ""));
    out.push_str(&format!(
        "{:<20} {:>12}   {:>10} {:>10} {:>8} {:>8} {:>8}\n",
        "Observable", "Value", "Corr Err", "Jack Err", "τ_int", "N_eff", "Burn-in"
    ));
    out.push_str(&format!("{:-<90}\n", ""));
    for budget in budgets {
        out.push_str(&budget.format_row());
        out.push('\n');
    }
    out.push_str(&format!("{:=<90}\n", ""));
    out.push_str("τ_int: Integrated autocorrelation time (Sokal window, c = 5)\n");
    out.push_str("N_eff: Effective sample size = N_samples / (2τ)\n");
    out
}

/// Print the error budget table to stdout.
pub fn print_error_budget_table(budgets: &[ErrorBudget]) {
    print!("{}", format_error_budget_table(budgets));
}
