//! Builders for CSV inputs.

use chrono::NaiveDate;

/// Builds an HR export in the CSV layout the sync reads.
#[derive(Debug, Clone, Default)]
pub struct WorkerCsvBuilder {
    rows: Vec<String>,
}

impl WorkerCsvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker(
        mut self,
        employee_id: &str,
        upn: &str,
        hire: NaiveDate,
        termination: Option<NaiveDate>,
    ) -> Self {
        let display_name = upn.split('@').next().unwrap_or(upn);
        self.rows.push(format!(
            "{},{},{},{},{}",
            employee_id,
            upn,
            display_name,
            hire,
            termination.map(|d| d.to_string()).unwrap_or_default()
        ));
        self
    }

    pub fn build(&self) -> String {
        let mut csv =
            String::from("employee_id,user_principal_name,display_name,hire_date,termination_date\n");
        for row in &self.rows {
            csv.push_str(row);
            csv.push('\n');
        }
        csv
    }
}

/// Builds a `upn,platform` membership CSV.
#[derive(Debug, Clone, Default)]
pub struct MembershipCsvBuilder {
    rows: Vec<(String, String)>,
}

impl MembershipCsvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, upn: &str, platform: &str) -> Self {
        self.rows.push((upn.to_string(), platform.to_string()));
        self
    }

    pub fn build(&self) -> String {
        let mut csv = String::from("upn,platform\n");
        for (upn, platform) in &self.rows {
            csv.push_str(&format!("{},{}\n", upn, platform));
        }
        csv
    }
}
