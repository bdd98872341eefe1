//! Findings table.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::models::Finding;

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "SUBSCRIPTION")]
    subscription: String,
    #[tabled(rename = "RESOURCE GROUP")]
    resource_group: String,
    #[tabled(rename = "ACCOUNT")]
    account: String,
    #[tabled(rename = "CONTAINER")]
    container: String,
    #[tabled(rename = "ACCESS")]
    access: String,
    #[tabled(rename = "FILES")]
    files: usize,
    #[tabled(rename = "URL")]
    url: String,
}

impl From<&Finding> for FindingRow {
    fn from(f: &Finding) -> Self {
        Self {
            subscription: f.subscription_name.clone(),
            resource_group: f.resource_group.clone(),
            account: f.storage_account.clone(),
            container: f.container.clone(),
            access: f.access.to_string(),
            files: f.total_files(),
            url: f.url.clone(),
        }
    }
}

pub fn render_findings(findings: &[Finding]) -> String {
    let rows: Vec<FindingRow> = findings.iter().map(FindingRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

/// Print the number of exposed containers followed by a table of them.
pub fn print_findings(findings: &[Finding]) {
    println!();
    if findings.is_empty() {
        println!("{} No public containers found", "✓".green());
        return;
    }

    println!(
        "{} {} public container(s) found",
        "✗".red(),
        findings.len().to_string().red().bold()
    );
    println!("{}", render_findings(findings));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ExtensionClassifier;
    use crate::models::PublicAccess;

    #[test]
    fn test_render_findings() {
        let finding = Finding {
            tenant_id: "t-1".to_string(),
            tenant_name: "Contoso".to_string(),
            subscription_id: "sub-1".to_string(),
            subscription_name: "Production".to_string(),
            resource_group: "web-rg".to_string(),
            storage_account: "webassets".to_string(),
            container: "images".to_string(),
            access: PublicAccess::Container,
            url: "https://webassets.blob.core.windows.net/images/".to_string(),
            histogram: ExtensionClassifier::default().classify(["a.png", "b.txt"]),
        };

        let rendered = render_findings(&[finding]);
        assert!(rendered.contains("RESOURCE GROUP"));
        assert!(rendered.contains("webassets"));
        assert!(rendered.contains("container"));
        assert!(rendered.contains("https://webassets.blob.core.windows.net/images/"));
    }
}
