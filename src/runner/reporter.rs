use crate::runner::preview::ChainItem;
use crate::runner::types::{ExecutionKind, ExecutionReport};
use crate::script::{AssertionResult, ConsoleEntry, ConsoleLevel};
use crate::utils::{ResponseFormat, ResponseFormatter};
use crate::variable::VariableContext;
use colored::Colorize;

pub struct ExecutionReporter {
    verbose: bool,
    formatter: ResponseFormatter,
}

impl ExecutionReporter {
    pub fn new(verbose: bool) -> Self {
        let format = if verbose {
            ResponseFormat::Verbose
        } else {
            ResponseFormat::Compact
        };

        Self {
            verbose,
            formatter: ResponseFormatter::new(format),
        }
    }

    /// 打印执行开始
    pub fn print_header(&self, file_path: &str, label: &str) {
        println!("\nRunning {} from {}...\n", label.cyan(), file_path.bold());
    }

    /// 打印一次执行的结果
    pub fn print_report(&self, report: &ExecutionReport) {
        let response = &report.response;

        // 链路中的前置步骤
        if report.kind == ExecutionKind::Chain && response.chain_items.len() > 1 {
            self.print_chain(&response.chain_items);
        }

        match self.formatter.format(response) {
            Ok(formatted) => {
                for line in formatted.lines() {
                    println!("   {}", line);
                }
            }
            Err(e) => {
                println!(
                    "   {}: Failed to format response: {}",
                    "Warning".yellow(),
                    e
                );
            }
        }
        println!();

        self.print_assertions(&response.assertions);
    }

    pub fn print_chain(&self, items: &[ChainItem]) {
        println!("   {}", "Chain:".bold());
        for (idx, item) in items.iter().enumerate() {
            let status = match &item.response {
                Some(r) if (200..400).contains(&r.status) => {
                    format!("{} {}", r.status, r.status_text).green().to_string()
                }
                Some(r) => format!("{} {}", r.status, r.status_text).red().to_string(),
                None => "not run".dimmed().to_string(),
            };
            let marker = if item.is_primary { "→" } else { " " };
            println!(
                "   {} {}. {} {} [{}]",
                marker,
                idx + 1,
                item.request.method.cyan(),
                item.label,
                status
            );
            if self.verbose {
                println!("        {}", item.request.url.dimmed());
            }
        }
        println!();
    }

    /// 打印断言结果
    pub fn print_assertions(&self, assertions: &[AssertionResult]) {
        if assertions.is_empty() {
            return;
        }
        println!("   Assertions:");
        for assertion in assertions {
            if assertion.passed {
                println!("     {} [{}] {}", "✓".green(), assertion.stage, assertion.message);
            } else {
                println!(
                    "     {} [{}] {}",
                    "✗".red(),
                    assertion.stage,
                    assertion.message.red()
                );
            }
        }
        println!();
    }

    /// 打印脚本控制台输出
    pub fn print_console(&self, entries: &[ConsoleEntry]) {
        if entries.is_empty() {
            return;
        }
        println!("   Console:");
        for entry in entries {
            let level = match entry.level {
                ConsoleLevel::Error => entry.level.to_string().red(),
                ConsoleLevel::Warn => entry.level.to_string().yellow(),
                ConsoleLevel::Debug => entry.level.to_string().dimmed(),
                ConsoleLevel::Info => entry.level.to_string().normal(),
            };
            println!(
                "     {} {} {} {}",
                entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
                level,
                entry.source.dimmed(),
                entry.message
            );
        }
        println!();
    }

    /// 打印脚本通过 `setVar` 写入的变量
    pub fn print_script_variables(&self, variables: &VariableContext) {
        if variables.is_empty() {
            return;
        }
        println!("   Variables set by scripts:");
        for line in script_variable_lines(variables) {
            println!("     {}", line);
        }
        println!();
    }

    /// 断言全部通过且响应成功
    pub fn passed(report: &ExecutionReport) -> bool {
        report.response.is_success() && report.response.assertions.iter().all(|a| a.passed)
    }
}

/// 每行 `key = value`，长值截断到 80 个字符
fn script_variable_lines(variables: &VariableContext) -> Vec<String> {
    variables
        .iter()
        .map(|(key, value)| {
            let shown: String = if value.chars().count() > 80 {
                format!("{}...", value.chars().take(80).collect::<String>())
            } else {
                value.clone()
            };
            format!("{} = {}", key.cyan(), shown)
        })
        .collect()
}

impl Default for ExecutionReporter {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::ResponseData;
    use crate::script::ScriptStage;
    use crate::variable::VariableContext;
    use indexmap::IndexMap;

    fn report(response: ResponseData) -> ExecutionReport {
        ExecutionReport {
            request_id: "f-0-1".to_string(),
            kind: ExecutionKind::Single,
            response,
            history: Vec::new(),
            variables: VariableContext::new(),
        }
    }

    #[test]
    fn test_passed_requires_success_and_assertions() {
        let mut response = ResponseData::new(200, "OK", IndexMap::new(), "", 1);
        assert!(ExecutionReporter::passed(&report(response.clone())));

        response.assertions.push(AssertionResult {
            passed: false,
            message: "status is 201".to_string(),
            stage: ScriptStage::Post,
        });
        assert!(!ExecutionReporter::passed(&report(response)));
        assert!(!ExecutionReporter::passed(&report(ResponseData::cancelled())));
    }

    #[test]
    fn test_script_variable_lines_truncate_long_values() {
        colored::control::set_override(false);
        let long = "x".repeat(100);
        let vars: VariableContext = [("token", "t-1"), ("blob", long.as_str())]
            .into_iter()
            .collect();
        let lines = script_variable_lines(&vars);
        assert!(lines.contains(&"token = t-1".to_string()));
        assert!(lines.contains(&format!("blob = {}...", "x".repeat(80))));
    }
}
