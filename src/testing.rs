//! In-memory fakes for unit tests.

use crate::collector_config::CollectorConfig;
use crate::config::SetupConfig;
use crate::errors::{HostError, InputError, QueryError};
use crate::host::{Host, LocalServer, PlatformInfo, RestartMethod};
use crate::inputs::SetupInputs;
use crate::query::{AdminConnection, ConnParams, Connector, Row};
use crate::resolver::{ExecutionMode, InputResolver, Prompt, Terminal};
use crate::state::SetupState;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Build rows from string slices.
pub fn rows(data: &[&[&str]]) -> Vec<Row> {
    data.iter()
        .map(|r| Row::new(r.iter().map(|v| v.to_string()).collect()))
        .collect()
}

#[derive(Debug, Clone)]
pub enum Reply {
    Rows(Vec<Row>),
    Error(String),
}

#[derive(Default)]
struct FakeDb {
    replies: Vec<(String, VecDeque<Reply>)>,
    exec_failures: Vec<(String, String)>,
    log: Vec<String>,
    ping_fails: bool,
    pings: usize,
    database: Option<String>,
}

/// Scripted database: queries are answered by the first registered pattern
/// contained in the SQL. A pattern with several replies yields them in
/// order and then keeps repeating the last one.
#[derive(Clone, Default)]
pub struct FakeConnection {
    params: ConnParams,
    db: Rc<RefCell<FakeDb>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, data: &[&[&str]]) -> &Self {
        self.respond_seq(pattern, vec![Reply::Rows(rows(data))])
    }

    pub fn respond_seq(&self, pattern: &str, replies: Vec<Reply>) -> &Self {
        self.db
            .borrow_mut()
            .replies
            .push((pattern.to_string(), replies.into()));
        self
    }

    pub fn respond_error(&self, pattern: &str, message: &str) -> &Self {
        self.respond_seq(pattern, vec![Reply::Error(message.to_string())])
    }

    pub fn fail_exec(&self, pattern: &str, message: &str) -> &Self {
        self.db
            .borrow_mut()
            .exec_failures
            .push((pattern.to_string(), message.to_string()));
        self
    }

    pub fn fail_ping(&self) {
        self.db.borrow_mut().ping_fails = true;
    }

    /// Every statement seen, queries and execs alike.
    pub fn statements(&self) -> Vec<String> {
        self.db.borrow().log.clone()
    }

    pub fn executed(&self, pattern: &str) -> bool {
        self.db.borrow().log.iter().any(|s| s.contains(pattern))
    }

    pub fn pings(&self) -> usize {
        self.db.borrow().pings
    }

    pub fn database(&self) -> Option<String> {
        self.db.borrow().database.clone()
    }

    fn with_params(&self, params: ConnParams) -> Self {
        self.db.borrow_mut().database = params.database.clone();
        Self {
            params,
            db: Rc::clone(&self.db),
        }
    }
}

impl AdminConnection for FakeConnection {
    fn ping(&self) -> Result<(), QueryError> {
        let mut db = self.db.borrow_mut();
        db.pings += 1;
        if db.ping_fails {
            Err(QueryError::Failed {
                stderr: "connection refused".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, QueryError> {
        let mut db = self.db.borrow_mut();
        db.log.push(sql.to_string());
        let Some((_, queue)) = db.replies.iter_mut().find(|(p, _)| sql.contains(p.as_str())) else {
            return Err(QueryError::Failed {
                stderr: format!("unexpected query: {}", sql),
            });
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Error(stderr)) => Err(QueryError::Failed { stderr }),
            None => Ok(Vec::new()),
        }
    }

    fn exec(&self, sql: &str) -> Result<(), QueryError> {
        let mut db = self.db.borrow_mut();
        db.log.push(sql.to_string());
        if let Some((_, message)) = db.exec_failures.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return Err(QueryError::Failed {
                stderr: message.clone(),
            });
        }
        Ok(())
    }

    fn switch_target(&mut self, database: &str) {
        self.params.database = Some(database.to_string());
        self.db.borrow_mut().database = Some(database.to_string());
    }

    fn params(&self) -> &ConnParams {
        &self.params
    }
}

/// Hands out prepared connections, then clones of the fallback.
#[derive(Clone, Default)]
pub struct FakeConnector {
    queued: Rc<RefCell<VecDeque<FakeConnection>>>,
    fallback: FakeConnection,
    opened: Rc<RefCell<Vec<ConnParams>>>,
}

impl FakeConnector {
    pub fn new(fallback: FakeConnection) -> Self {
        Self {
            fallback,
            ..Default::default()
        }
    }

    pub fn queue(&self, conn: FakeConnection) {
        self.queued.borrow_mut().push_back(conn);
    }

    pub fn opened(&self) -> Vec<ConnParams> {
        self.opened.borrow().clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, params: ConnParams) -> Box<dyn AdminConnection> {
        self.opened.borrow_mut().push(params.clone());
        let base = self
            .queued
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Box::new(base.with_params(params))
    }
}

#[derive(Default)]
struct HostRecord {
    platform: PlatformInfo,
    servers: Vec<LocalServer>,
    links: HashMap<PathBuf, PathBuf>,
    existing: Vec<PathBuf>,
    collector_output: Option<Result<String, String>>,
    reload_fails: bool,
    restarts: Vec<RestartMethod>,
    reloads: usize,
    collector_runs: Vec<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct FakeHost {
    record: Rc<RefCell<HostRecord>>,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.record.borrow_mut().platform =
            PlatformInfo::from_os_release("linux", "ID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"22.04\"\n");
        host
    }

    pub fn platform(&self, info: PlatformInfo) {
        self.record.borrow_mut().platform = info;
    }

    pub fn server(&self, socket_dir: &str, port: u16) {
        self.record.borrow_mut().servers.push(LocalServer {
            socket_dir: socket_dir.to_string(),
            port,
        });
    }

    pub fn link(&self, from: &str, to: &str) {
        self.record
            .borrow_mut()
            .links
            .insert(PathBuf::from(from), PathBuf::from(to));
    }

    pub fn existing_path(&self, path: &str) {
        self.record.borrow_mut().existing.push(PathBuf::from(path));
    }

    pub fn collector_output(&self, result: Result<&str, &str>) {
        self.record.borrow_mut().collector_output =
            Some(result.map(str::to_string).map_err(str::to_string));
    }

    pub fn fail_reload(&self) {
        self.record.borrow_mut().reload_fails = true;
    }

    pub fn restarts(&self) -> Vec<RestartMethod> {
        self.record.borrow().restarts.clone()
    }

    pub fn reloads(&self) -> usize {
        self.record.borrow().reloads
    }

    pub fn collector_runs(&self) -> Vec<Vec<String>> {
        self.record.borrow().collector_runs.clone()
    }
}

impl Host for FakeHost {
    fn platform(&self) -> Result<PlatformInfo, HostError> {
        Ok(self.record.borrow().platform.clone())
    }

    fn local_servers(&self, _socket_dirs: &[String]) -> Result<Vec<LocalServer>, HostError> {
        Ok(self.record.borrow().servers.clone())
    }

    fn postmaster_pid(&self) -> Result<u32, HostError> {
        Ok(4242)
    }

    fn resolve_link(&self, path: &Path) -> Result<PathBuf, HostError> {
        self.record
            .borrow()
            .links
            .get(path)
            .cloned()
            .ok_or_else(|| HostError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such link"),
            })
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.record.borrow().existing.iter().any(|p| p == path)
    }

    fn restart_postgres(&self, method: &RestartMethod) -> Result<(), HostError> {
        self.record.borrow_mut().restarts.push(method.clone());
        Ok(())
    }

    fn reload_collector(&self, process_name: &str) -> Result<u32, HostError> {
        let mut record = self.record.borrow_mut();
        if record.reload_fails {
            return Err(HostError::ProcessNotFound(process_name.to_string()));
        }
        record.reloads += 1;
        Ok(777)
    }

    fn run_collector(&self, program: &str, args: &[String]) -> Result<String, HostError> {
        let mut record = self.record.borrow_mut();
        record.collector_runs.push(args.to_vec());
        match record.collector_output.clone() {
            Some(Ok(out)) => Ok(out),
            None => Ok("Test successful".to_string()),
            Some(Err(message)) => Err(HostError::Command {
                program: program.to_string(),
                message,
            }),
        }
    }
}

/// A queued answer for [`FakeTerminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Confirm(bool),
    Select(usize),
    MultiSelect(Vec<usize>),
    Input(String),
}

#[derive(Default)]
struct TerminalRecord {
    answers: VecDeque<Answer>,
    prompts: Vec<String>,
    said: Vec<String>,
}

/// Answers prompts from a queue. Panics on an unexpected prompt.
#[derive(Clone, Default)]
pub struct FakeTerminal {
    record: Rc<RefCell<TerminalRecord>>,
}

impl FakeTerminal {
    pub fn new(answers: Vec<Answer>) -> Self {
        let term = Self::default();
        term.record.borrow_mut().answers = answers.into();
        term
    }

    pub fn prompts(&self) -> Vec<String> {
        self.record.borrow().prompts.clone()
    }

    pub fn said(&self) -> Vec<String> {
        self.record.borrow().said.clone()
    }

    fn next(&self, prompt: &Prompt) -> Answer {
        let mut record = self.record.borrow_mut();
        record.prompts.push(prompt.message.clone());
        record
            .answers
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected prompt: {}", prompt.message))
    }
}

impl Terminal for FakeTerminal {
    fn confirm(&mut self, prompt: &Prompt, _default: bool) -> Result<bool, InputError> {
        match self.next(prompt) {
            Answer::Confirm(v) => Ok(v),
            other => panic!("expected confirm answer for {:?}, got {other:?}", prompt.message),
        }
    }

    fn select(
        &mut self,
        prompt: &Prompt,
        _options: &[String],
        _default: usize,
    ) -> Result<usize, InputError> {
        match self.next(prompt) {
            Answer::Select(i) => Ok(i),
            other => panic!("expected select answer for {:?}, got {other:?}", prompt.message),
        }
    }

    fn multi_select(
        &mut self,
        prompt: &Prompt,
        _options: &[String],
    ) -> Result<Vec<usize>, InputError> {
        match self.next(prompt) {
            Answer::MultiSelect(v) => Ok(v),
            other => panic!("expected multi-select answer for {:?}, got {other:?}", prompt.message),
        }
    }

    fn input(&mut self, prompt: &Prompt, _suggestion: Option<&str>) -> Result<String, InputError> {
        match self.next(prompt) {
            Answer::Input(v) => Ok(v),
            other => panic!("expected input answer for {:?}, got {other:?}", prompt.message),
        }
    }

    fn say(&mut self, text: &str) {
        self.record.borrow_mut().said.push(text.to_string());
    }
}

/// Assembles a [`SetupState`] from fakes.
pub struct StateBuilder {
    mode: ExecutionMode,
    inputs: SetupInputs,
    terminal: FakeTerminal,
    host: FakeHost,
    connector: FakeConnector,
    connection: Option<FakeConnection>,
    settings: SetupConfig,
    config: Option<CollectorConfig>,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self {
            mode: ExecutionMode::Scripted,
            inputs: SetupInputs::default(),
            terminal: FakeTerminal::default(),
            host: FakeHost::new(),
            connector: FakeConnector::default(),
            connection: None,
            settings: SetupConfig::default(),
            config: None,
        }
    }

    pub fn scripted(mut self, inputs: SetupInputs) -> Self {
        self.mode = ExecutionMode::Scripted;
        self.inputs = inputs;
        self
    }

    pub fn interactive(mut self, terminal: FakeTerminal) -> Self {
        self.mode = ExecutionMode::Interactive;
        self.terminal = terminal;
        self
    }

    pub fn host(mut self, host: FakeHost) -> Self {
        self.host = host;
        self
    }

    pub fn connector(mut self, connector: FakeConnector) -> Self {
        self.connector = connector;
        self
    }

    pub fn connection(mut self, conn: FakeConnection) -> Self {
        self.connection = Some(conn);
        self
    }

    pub fn settings(mut self, settings: SetupConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Write `content` to `path`, load it and point the state at it.
    pub fn config_file(mut self, path: PathBuf, content: &str) -> Self {
        std::fs::write(&path, content).unwrap();
        self.config = Some(CollectorConfig::load(&path).unwrap());
        self.settings.collector_config = path;
        self
    }

    pub fn build(self) -> SetupState {
        let resolver = InputResolver::new(self.mode, self.inputs, Box::new(self.terminal));
        let mut state = SetupState::new(
            self.settings,
            resolver,
            Box::new(self.host),
            Box::new(self.connector),
        );
        if let Some(config) = self.config {
            state.set_config(config);
        }
        if let Some(conn) = self.connection {
            state.set_connection(Box::new(conn));
        }
        state
    }
}
