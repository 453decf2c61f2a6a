use console::{Term, style};

use crate::build::build_types::BuildStep;
use crate::build::{BuildProgress, BuildReporter};
use crate::helpers::emojis::*;

/// Check if we're running in a TTY (interactive terminal)
fn is_tty() -> bool {
    Term::stdout().is_term() && Term::stderr().is_term()
}

/// Format timing string, returning empty string if no_timing is true
fn timing(duration_seconds: f64, no_timing: bool) -> String {
    if no_timing {
        String::new()
    } else {
        format!(" in {:.2}s", duration_seconds)
    }
}

fn step_label(step: BuildStep) -> (&'static str, &'static str) {
    match step {
        BuildStep::Compile => ("[1/3]", "Compiled"),
        BuildStep::Optimize => ("[2/3]", "Optimized"),
        BuildStep::Bind => ("[3/3]", "Bound"),
    }
}

/// Renders progress to the terminal. Plain output (no emojis, no step
/// prefixes) when not attached to a TTY.
pub struct TerminalReporter {
    show_progress: bool,
    no_timing: bool,
    plain_output: bool,
}

impl TerminalReporter {
    pub fn new(show_progress: bool, no_timing: bool) -> Self {
        Self {
            show_progress,
            no_timing,
            plain_output: !is_tty(),
        }
    }
}

impl BuildReporter for TerminalReporter {
    fn report(&self, progress: BuildProgress) {
        match progress {
            BuildProgress::CompilerWarning(message) => {
                if self.plain_output {
                    eprintln!("{message}");
                } else {
                    eprintln!("{}", style(&message).yellow());
                }
            }
            BuildProgress::BuildFailed { project, message } => {
                let message = format!("Could not build {}: {}", project.display(), message);
                if self.plain_output {
                    eprintln!("{message}");
                } else {
                    eprintln!("{}{}{}", LINE_CLEAR, CROSS, style(&message).red());
                }
            }
            BuildProgress::AfterBuildOutput { command, stdout, stderr } => {
                if let Some(stdout) = stdout {
                    println!("[after-build] {stdout}");
                }
                if let Some(stderr) = stderr {
                    if self.plain_output {
                        eprintln!("[after-build] {stderr}");
                    } else {
                        eprintln!("{} {}", style("[after-build]").dim(), style(stderr).red());
                    }
                }
                log::debug!("after-build command `{command}` reported output");
            }
            _ if !self.show_progress => {}
            BuildProgress::CycleStarted { project } => {
                if !self.plain_output {
                    println!("{}{}Resolving {}", LINE_CLEAR, LOOKING_GLASS, project.display());
                }
            }
            BuildProgress::CacheHit { target_name, .. } => {
                if self.plain_output {
                    println!("{target_name} is up to date");
                } else {
                    println!("{}{}{} is up to date", LINE_CLEAR, ZAP, style(target_name).bold());
                }
            }
            BuildProgress::Adopted { target_name, .. } => {
                if self.plain_output {
                    println!("Reusing earlier build of {target_name}");
                } else {
                    println!(
                        "{}{}Reusing earlier build of {}",
                        LINE_CLEAR,
                        RECYCLE,
                        style(target_name).bold()
                    );
                }
            }
            BuildProgress::StepStarted { target_name, step } => {
                if !self.plain_output {
                    let (prefix, _) = step_label(step);
                    print!(
                        "{}{} {}Running {} step for {}",
                        LINE_CLEAR,
                        style(prefix).bold().dim(),
                        SWORDS,
                        step,
                        target_name
                    );
                }
            }
            BuildProgress::StepFinished {
                target_name,
                step,
                duration_seconds,
            } => {
                let (prefix, verb) = step_label(step);
                let emoji = if step == BuildStep::Bind { LINK } else { SWORDS };
                if self.plain_output {
                    println!("{verb} {target_name}");
                } else {
                    println!(
                        "{}{} {}{} {}{}",
                        LINE_CLEAR,
                        style(prefix).bold().dim(),
                        emoji,
                        verb,
                        target_name,
                        timing(duration_seconds, self.no_timing)
                    );
                }
            }
            BuildProgress::Built {
                target_name,
                bridge_module,
                duration_seconds,
            } => {
                if self.plain_output {
                    println!("Built {target_name}: {}", bridge_module.display());
                } else {
                    println!(
                        "{}{}Finished {}{}: {}",
                        LINE_CLEAR,
                        SPARKLES,
                        style(target_name).bold(),
                        timing(duration_seconds, self.no_timing),
                        bridge_module.display()
                    );
                }
            }
        }
    }
}
