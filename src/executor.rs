//! Process orchestration: pipe wiring, forking, redirection and reaping.
//!
//! Process creation is kept behind the [`Spawner`] capability so the
//! wiring logic can be exercised without forking. The production
//! implementation, [`NixSpawner`], forks one child per stage, dup2s the
//! adjacent pipe ends onto stdin/stdout, applies the stage's own
//! redirections last (they win over pipe wiring), closes every pipe
//! descriptor the child does not use, and either runs a builtin in the
//! child or execs the resolved external binary.

use std::cell::RefCell;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::rc::Rc;

use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{self, ForkResult, Pid};

use crate::builtin::{Builtin, ExitCode, ShellContext};
use crate::error::ShellError;
use crate::external::CommandIndex;
use crate::parser::{RedirMode, RedirStream, Redirection, Stage};

/// Descriptor wiring handed to a spawned stage: the pipe ends to dup2
/// onto stdin/stdout, plus every pipe descriptor of the pipeline, all of
/// which the child must close once wired.
#[derive(Debug, Clone)]
pub struct StageIo {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub shared: Vec<RawFd>,
}

impl StageIo {
    /// No pipe wiring: the child inherits the shell's streams.
    pub fn inherit() -> Self {
        StageIo {
            stdin: None,
            stdout: None,
            shared: Vec::new(),
        }
    }
}

/// The process-creation boundary, mockable in tests.
pub trait Spawner {
    fn spawn(&mut self, stage: &Stage, io: StageIo) -> Result<Pid, ShellError>;
    fn wait(&mut self, pid: Pid) -> Result<ExitCode, ShellError>;
}

/// Production spawner backed by fork(2)/execv(2)/waitpid(2).
pub struct NixSpawner<'a> {
    pub index: Rc<RefCell<CommandIndex>>,
    pub history: &'a [String],
}

impl Spawner for NixSpawner<'_> {
    fn spawn(&mut self, stage: &Stage, io: StageIo) -> Result<Pid, ShellError> {
        // Flush so buffered shell output is not duplicated into the child.
        let _ = io::stdout().flush();
        match unsafe { unistd::fork() }.map_err(|e| ShellError::syscall("fork", e))? {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => {
                let code = self.child_main(stage, &io);
                std::process::exit(code);
            }
        }
    }

    fn wait(&mut self, pid: Pid) -> Result<ExitCode, ShellError> {
        match waitpid(pid, None).map_err(|e| ShellError::syscall("waitpid", e))? {
            WaitStatus::Exited(_, code) => Ok(code),
            WaitStatus::Signaled(_, signal, _) => Ok(128 + signal as ExitCode),
            _ => Ok(1),
        }
    }
}

impl NixSpawner<'_> {
    /// Everything the child does between fork and exec/exit. Only
    /// returns when the stage cannot exec; the caller exits with the
    /// returned code.
    fn child_main(&self, stage: &Stage, io: &StageIo) -> ExitCode {
        if let Some(fd) = io.stdin {
            if unistd::dup2(fd, 0).is_err() {
                return 1;
            }
        }
        if let Some(fd) = io.stdout {
            if unistd::dup2(fd, 1).is_err() {
                return 1;
            }
        }
        for fd in &io.shared {
            let _ = unistd::close(*fd);
        }
        // Explicit redirections are applied after pipe wiring so they
        // take precedence when both target the same stream.
        if let Err(err) = apply_redirections(&stage.redirections) {
            eprintln!("{err}");
            return 1;
        }

        let Some(name) = stage.argv.first() else {
            // Empty stage: silently skipped, unsuccessful.
            return 1;
        };
        if let Some(builtin) = Builtin::lookup(name) {
            let mut index = self.index.borrow_mut();
            let mut ctx = ShellContext {
                index: &mut index,
                history: self.history,
            };
            let mut stdout = io::stdout();
            return match builtin.run(&stage.argv[1..], &mut stdout, &mut ctx) {
                Ok(code) => {
                    let _ = stdout.flush();
                    code
                }
                Err(err) => {
                    eprintln!("{err}");
                    1
                }
            };
        }
        let resolved = self.index.borrow_mut().resolve(name);
        let Some(path) = resolved else {
            eprintln!("{name}: command not found");
            return 1;
        };
        // Only reachable when execv itself failed.
        let err = exec(&path, &stage.argv);
        eprintln!("{err}");
        1
    }
}

fn exec(path: &Path, argv: &[String]) -> ShellError {
    let strings = std::iter::once(path.as_os_str().as_bytes())
        .chain(argv.iter().skip(1).map(|a| a.as_bytes()))
        .map(CString::new)
        .collect::<Result<Vec<_>, _>>();
    let args = match strings {
        Ok(args) => args,
        Err(_) => {
            return ShellError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "argument contains a NUL byte",
            ));
        }
    };
    match unistd::execv(&args[0], &args) {
        Err(e) => ShellError::syscall("execv", e),
        Ok(infallible) => match infallible {},
    }
}

fn target_fd(stream: RedirStream) -> RawFd {
    match stream {
        RedirStream::Stdout => 1,
        RedirStream::Stderr => 2,
    }
}

fn open_redirect(redirection: &Redirection) -> Result<File, ShellError> {
    let mut options = OpenOptions::new();
    options.create(true).write(true);
    match redirection.mode {
        RedirMode::Truncate => options.truncate(true),
        RedirMode::Append => options.append(true),
    };
    options.open(&redirection.path).map_err(|source| ShellError::Redirect {
        path: redirection.path.clone(),
        source,
    })
}

/// Child-side redirection: dup2 the opened file over the target stream.
/// The file descriptor itself closes when `file` drops.
fn apply_redirections(redirections: &[Redirection]) -> Result<(), ShellError> {
    for redirection in redirections {
        let file = open_redirect(redirection)?;
        unistd::dup2(file.as_raw_fd(), target_fd(redirection.stream))
            .map_err(|e| ShellError::syscall("dup2", e))?;
    }
    Ok(())
}

/// Scoped descriptor swap for builtins that run in the shell process:
/// saves the target stream with dup(2), points it at the file, and
/// restores it on drop no matter how the builtin returns.
pub struct RedirGuard {
    target: RawFd,
    saved: RawFd,
}

impl RedirGuard {
    pub fn apply(redirections: &[Redirection]) -> Result<Vec<RedirGuard>, ShellError> {
        let mut guards = Vec::new();
        for redirection in redirections {
            let file = open_redirect(redirection)?;
            let target = target_fd(redirection.stream);
            let saved = unistd::dup(target).map_err(|e| ShellError::syscall("dup", e))?;
            if let Err(e) = unistd::dup2(file.as_raw_fd(), target) {
                let _ = unistd::close(saved);
                return Err(ShellError::syscall("dup2", e));
            }
            guards.push(RedirGuard { target, saved });
        }
        Ok(guards)
    }
}

impl Drop for RedirGuard {
    fn drop(&mut self) {
        let _ = unistd::dup2(self.saved, self.target);
        let _ = unistd::close(self.saved);
    }
}

/// stdin/stdout pipe ends for each stage: stage i reads from pipe i-1
/// and writes to pipe i; the endpoints stay on the shell's own streams.
fn plan_wiring(
    stage_count: usize,
    pipes: &[(RawFd, RawFd)],
) -> Vec<(Option<RawFd>, Option<RawFd>)> {
    (0..stage_count)
        .map(|i| {
            let stdin = (i > 0).then(|| pipes[i - 1].0);
            let stdout = (i + 1 < stage_count).then(|| pipes[i].1);
            (stdin, stdout)
        })
        .collect()
}

/// Runs a multi-stage pipeline: creates the `len-1` pipes, spawns every
/// stage, closes all pipe ends in the parent, and reaps every spawned
/// child even when a later spawn failed. The pipeline status is the last
/// stage's status.
pub fn run_pipeline<S: Spawner>(stages: &[Stage], spawner: &mut S) -> Result<ExitCode, ShellError> {
    let mut pipes: Vec<(OwnedFd, OwnedFd)> = Vec::with_capacity(stages.len().saturating_sub(1));
    for _ in 1..stages.len() {
        let (read, write) = unistd::pipe().map_err(|e| ShellError::syscall("pipe", e))?;
        pipes.push((read, write));
    }
    let raw: Vec<(RawFd, RawFd)> = pipes
        .iter()
        .map(|(r, w)| (r.as_raw_fd(), w.as_raw_fd()))
        .collect();
    let shared: Vec<RawFd> = raw.iter().flat_map(|(r, w)| [*r, *w]).collect();

    let mut children = Vec::with_capacity(stages.len());
    let mut spawn_failure = None;
    for (stage, (stdin, stdout)) in stages.iter().zip(plan_wiring(stages.len(), &raw)) {
        let io = StageIo {
            stdin,
            stdout,
            shared: shared.clone(),
        };
        match spawner.spawn(stage, io) {
            Ok(pid) => children.push(pid),
            Err(err) => {
                spawn_failure = Some(err);
                break;
            }
        }
    }

    // The parent keeps none of the pipe ends; dropping them here closes
    // everything before waiting, or the children would never see EOF.
    drop(pipes);

    let mut status = 0;
    for pid in children {
        match spawner.wait(pid) {
            Ok(code) => status = code,
            Err(err) => {
                eprintln!("{err}");
                status = 1;
            }
        }
    }
    match spawn_failure {
        Some(err) => Err(err),
        None => Ok(status),
    }
}

/// Front door for the read-eval loop: routes a parsed pipeline to the
/// in-process builtin path or the forking paths.
pub struct Executor {
    index: Rc<RefCell<CommandIndex>>,
    history: Rc<RefCell<Vec<String>>>,
}

impl Executor {
    pub fn new(index: Rc<RefCell<CommandIndex>>, history: Rc<RefCell<Vec<String>>>) -> Self {
        Executor { index, history }
    }

    pub fn run(&self, stages: &[Stage]) -> Result<ExitCode, ShellError> {
        let history = self.history.borrow();
        match stages {
            [] => Ok(0),
            [stage] => self.run_single(stage, &history),
            many => {
                let mut spawner = NixSpawner {
                    index: Rc::clone(&self.index),
                    history: &history,
                };
                run_pipeline(many, &mut spawner)
            }
        }
    }

    fn run_single(&self, stage: &Stage, history: &[String]) -> Result<ExitCode, ShellError> {
        let Some(name) = stage.argv.first() else {
            return Ok(0);
        };
        if let Some(builtin) = Builtin::lookup(name) {
            let mut stdout = io::stdout();
            let _ = stdout.flush();
            let guards = RedirGuard::apply(&stage.redirections)?;
            let mut index = self.index.borrow_mut();
            let mut ctx = ShellContext {
                index: &mut index,
                history,
            };
            // Errors are reported while the redirections are still in
            // effect, so `2>` captures them like a real shell would.
            let code = match builtin.run(&stage.argv[1..], &mut stdout, &mut ctx) {
                Ok(code) => code,
                Err(err) => {
                    eprintln!("{err}");
                    1
                }
            };
            let _ = stdout.flush();
            drop(guards);
            return Ok(code);
        }
        // Resolve in the parent so a missing command never forks.
        if self.index.borrow_mut().resolve(name).is_none() {
            return Err(ShellError::CommandNotFound(name.clone()));
        }
        let mut spawner = NixSpawner {
            index: Rc::clone(&self.index),
            history,
        };
        let pid = spawner.spawn(stage, StageIo::inherit())?;
        spawner.wait(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;

    fn trivial_stage(name: &str) -> Stage {
        Stage {
            argv: vec![name.to_string()],
            redirections: Vec::new(),
        }
    }

    struct MockSpawner {
        spawned: Vec<(Vec<String>, StageIo)>,
        waited: Vec<Pid>,
        fail_at: Option<usize>,
    }

    impl MockSpawner {
        fn new() -> Self {
            MockSpawner {
                spawned: Vec::new(),
                waited: Vec::new(),
                fail_at: None,
            }
        }
    }

    impl Spawner for MockSpawner {
        fn spawn(&mut self, stage: &Stage, io: StageIo) -> Result<Pid, ShellError> {
            if self.fail_at == Some(self.spawned.len()) {
                return Err(ShellError::syscall("fork", Errno::EAGAIN));
            }
            self.spawned.push((stage.argv.clone(), io));
            Ok(Pid::from_raw(self.spawned.len() as i32))
        }

        fn wait(&mut self, pid: Pid) -> Result<ExitCode, ShellError> {
            self.waited.push(pid);
            // Hand back the fake pid so tests can see which wait "won".
            Ok(pid.as_raw())
        }
    }

    #[test]
    fn wiring_plan_connects_adjacent_stages() {
        let pipes = [(10, 11), (12, 13)];
        let plan = plan_wiring(3, &pipes);
        assert_eq!(plan[0], (None, Some(11)));
        assert_eq!(plan[1], (Some(10), Some(13)));
        assert_eq!(plan[2], (Some(12), None));
    }

    #[test]
    fn pipeline_creates_len_minus_one_pipes_and_reaps_all() {
        let stages: Vec<Stage> = (0..10).map(|_| trivial_stage("true")).collect();
        let mut mock = MockSpawner::new();
        let status = run_pipeline(&stages, &mut mock).unwrap();

        assert_eq!(mock.spawned.len(), 10);
        assert_eq!(mock.waited.len(), 10);
        // 9 pipes, both ends visible to every child.
        for (_, io) in &mock.spawned {
            assert_eq!(io.shared.len(), 18);
        }
        // Status comes from the last stage.
        assert_eq!(status, 10);
    }

    #[test]
    fn pipeline_children_are_wired_to_adjacent_pipe_ends() {
        let stages: Vec<Stage> = (0..3).map(|_| trivial_stage("cat")).collect();
        let mut mock = MockSpawner::new();
        run_pipeline(&stages, &mut mock).unwrap();

        // `shared` is the flattened (read, write) pipe list, so pipe i is
        // (shared[2i], shared[2i+1]).
        let shared = mock.spawned[0].1.shared.clone();
        assert_eq!(mock.spawned[0].1.stdin, None);
        assert_eq!(mock.spawned[0].1.stdout, Some(shared[1]));
        assert_eq!(mock.spawned[1].1.stdin, Some(shared[0]));
        assert_eq!(mock.spawned[1].1.stdout, Some(shared[3]));
        assert_eq!(mock.spawned[2].1.stdin, Some(shared[2]));
        assert_eq!(mock.spawned[2].1.stdout, None);
    }

    #[test]
    fn failed_spawn_aborts_but_still_reaps_earlier_children() {
        let stages: Vec<Stage> = (0..4).map(|_| trivial_stage("cat")).collect();
        let mut mock = MockSpawner::new();
        mock.fail_at = Some(2);
        let result = run_pipeline(&stages, &mut mock);

        assert!(result.is_err());
        assert_eq!(mock.spawned.len(), 2);
        assert_eq!(mock.waited.len(), 2);
    }

    #[test]
    fn single_pipe_has_no_shared_fds_left_dangling() {
        let stages = vec![trivial_stage("a"), trivial_stage("b")];
        let mut mock = MockSpawner::new();
        run_pipeline(&stages, &mut mock).unwrap();
        assert_eq!(mock.spawned[0].1.shared.len(), 2);
    }

    #[test]
    fn open_redirect_truncates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "old content\n").unwrap();

        let truncate = Redirection {
            stream: RedirStream::Stdout,
            mode: RedirMode::Truncate,
            path: path.to_string_lossy().to_string(),
        };
        {
            let mut file = open_redirect(&truncate).unwrap();
            file.write_all(b"new\n").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");

        let append = Redirection {
            mode: RedirMode::Append,
            ..truncate.clone()
        };
        {
            let mut file = open_redirect(&append).unwrap();
            file.write_all(b"more\n").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\nmore\n");
    }

    #[test]
    fn stage_redirection_wins_over_pipe_wiring() {
        let dir = tempfile::tempdir().unwrap();
        let first_out = dir.path().join("first.txt");
        let second_out = dir.path().join("second.txt");

        // Both stages are builtins, so the children need no PATH. Were
        // the redirection applied before the pipe wiring, the first
        // stage's output would end up in the pipe and first.txt would
        // stay empty.
        let redirect = |path: &std::path::Path| Redirection {
            stream: RedirStream::Stdout,
            mode: RedirMode::Truncate,
            path: path.to_string_lossy().to_string(),
        };
        let stages = vec![
            Stage {
                argv: vec!["echo".into(), "upstream".into()],
                redirections: vec![redirect(&first_out)],
            },
            Stage {
                argv: vec!["echo".into(), "downstream".into()],
                redirections: vec![redirect(&second_out)],
            },
        ];

        let index = Rc::new(RefCell::new(CommandIndex::default()));
        let mut spawner = NixSpawner { index, history: &[] };
        let status = run_pipeline(&stages, &mut spawner).unwrap();

        assert_eq!(status, 0);
        assert_eq!(std::fs::read_to_string(&first_out).unwrap(), "upstream\n");
        assert_eq!(std::fs::read_to_string(&second_out).unwrap(), "downstream\n");
    }

    #[test]
    fn open_redirect_reports_the_failing_path() {
        let bad = Redirection {
            stream: RedirStream::Stdout,
            mode: RedirMode::Truncate,
            path: "/definitely/missing/dir/out.txt".into(),
        };
        let err = open_redirect(&bad).unwrap_err();
        assert!(err.to_string().starts_with("/definitely/missing/dir/out.txt:"));
    }
}
