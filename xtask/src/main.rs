use std::{
    env,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

// ----------------------------------------------------------------
// Entry point
// ----------------------------------------------------------------

fn main() {
    if let Err(e) = try_main() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    match env::args().nth(1).as_deref() {
        Some(task) => execute_graph(task),
        None => {
            eprintln!("Usage: cargo xtask <task>\n");
            eprintln!("Tasks:");
            for task in &all_tasks() {
                eprintln!("  {:<16}{}", task.name, task.about);
            }
            std::process::exit(1);
        }
    }
}

// ----------------------------------------------------------------
// Task graph
// ----------------------------------------------------------------

struct Task {
    name: &'static str,
    about: &'static str,
    deps: &'static [&'static str],
    run: fn() -> Result<()>,
}

fn noop() -> Result<()> {
    Ok(())
}

fn all_tasks() -> Vec<Task> {
    vec![
        Task {
            name: "fmt-check",
            about: "rustfmt in check mode",
            deps: &[],
            run: fmt_check,
        },
        Task {
            name: "clippy",
            about: "clippy on every target, warnings denied",
            deps: &[],
            run: clippy,
        },
        Task {
            name: "test",
            about: "workspace tests, default features",
            deps: &[],
            run: test,
        },
        Task {
            name: "test-unchecked",
            about: "rgpu-guard tests with guards and tracking compiled out",
            deps: &[],
            run: test_unchecked,
        },
        Task {
            name: "check-graphs",
            about: "run graph-check over graph-check/graphs",
            deps: &["test"],
            run: check_graphs,
        },
        Task {
            name: "ci",
            about: "everything above",
            deps: &[
                "fmt-check",
                "clippy",
                "test",
                "test-unchecked",
                "check-graphs",
            ],
            run: noop,
        },
    ]
}

#[derive(Clone, Copy, PartialEq)]
enum Status {
    Succeeded,
    Failed,
    Skipped,
}

fn task_index(tasks: &[Task], name: &str) -> Result<usize> {
    tasks
        .iter()
        .position(|t| t.name == name)
        .ok_or_else(|| format!("unknown task: `{name}`").into())
}

fn collect_topo(
    tasks: &[Task],
    name: &str,
    visited: &mut Vec<bool>,
    order: &mut Vec<usize>,
) -> Result<()> {
    let idx = task_index(tasks, name)?;
    if visited[idx] {
        return Ok(());
    }
    visited[idx] = true;
    for &dep in tasks[idx].deps {
        collect_topo(tasks, dep, visited, order)?;
    }
    order.push(idx);
    Ok(())
}

fn execute_graph(target: &str) -> Result<()> {
    let tasks = all_tasks();
    let mut visited = vec![false; tasks.len()];
    let mut order: Vec<usize> = Vec::new();
    collect_topo(&tasks, target, &mut visited, &mut order)?;

    let mut statuses: Vec<Option<Status>> = vec![None; tasks.len()];

    for &idx in &order {
        let task = &tasks[idx];
        // Every dep was resolved by collect_topo, so lookups cannot miss.
        let blocked = task.deps.iter().any(|&dep| {
            task_index(&tasks, dep).is_ok_and(|dep_idx| {
                matches!(
                    statuses[dep_idx],
                    Some(Status::Failed | Status::Skipped)
                )
            })
        });

        if blocked {
            eprintln!("skip: {}", task.name);
            statuses[idx] = Some(Status::Skipped);
            continue;
        }

        println!("task: {}", task.name);
        match (task.run)() {
            Ok(()) => statuses[idx] = Some(Status::Succeeded),
            Err(e) => {
                eprintln!("failed: {}: {e}", task.name);
                statuses[idx] = Some(Status::Failed);
            }
        }
    }

    let failed: Vec<&str> = order
        .iter()
        .filter(|&&i| statuses[i] == Some(Status::Failed))
        .map(|&i| tasks[i].name)
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        let names = failed.join(", ");
        Err(format!("{} task(s) failed: {names}", failed.len()).into())
    }
}

// ----------------------------------------------------------------
// Task implementations
// ----------------------------------------------------------------

fn workspace_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| "xtask has no parent directory".into())
}

fn run(cmd: &mut Command) -> Result<()> {
    let status = cmd.status()?;
    if !status.success() {
        return Err(format!(
            "command {:?} failed with {}",
            cmd.get_program(),
            status
        )
        .into());
    }
    Ok(())
}

fn cargo(args: &[&str]) -> Result<()> {
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let root = workspace_root()?;
    let mut command = Command::new(cargo);
    command.args(args).current_dir(root);
    run(&mut command)
}

fn fmt_check() -> Result<()> {
    cargo(&["fmt", "--all", "--check"])
}

fn clippy() -> Result<()> {
    cargo(&[
        "clippy",
        "--workspace",
        "--all-targets",
        "--",
        "-D",
        "warnings",
    ])
}

fn test() -> Result<()> {
    cargo(&["test", "--workspace"])
}

fn test_unchecked() -> Result<()> {
    cargo(&[
        "test",
        "-p",
        "rgpu-guard",
        "--no-default-features",
    ])
}

fn check_graphs() -> Result<()> {
    let root = workspace_root()?;
    let graphs_dir = root.join("graph-check").join("graphs");
    let mut checked = 0u32;

    for entry in fs::read_dir(&graphs_dir)? {
        let path = entry?.path();
        if path.extension() != Some(OsStr::new("toml")) {
            continue;
        }
        let Some(path_str) = path.to_str() else {
            let message = format!("non-UTF-8 graph path {}", path.display());
            return Err(message.into());
        };
        println!("Checking {}", path.display());
        cargo(&[
            "run",
            "--quiet",
            "-p",
            "graph-check",
            "--",
            "--framebuffer",
            "--quiet",
            "--tracing-log-level",
            "off",
            path_str,
        ])?;
        checked += 1;
    }

    println!("Graphs: {checked} checked");
    Ok(())
}
