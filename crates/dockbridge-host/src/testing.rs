// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process doubles for the host's external collaborators.

use async_trait::async_trait;
use dockbridge_wgtunnel_common::{NetworkRecord, NetworkScope, TunnelAddresses, TunnelIdentity};
use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::assets::AssetSource;
use crate::command::{CommandLine, CommandOutput, CommandRunner};
use crate::engine::{EngineClient, HelperContainerSpec, NetworkEvent};
use crate::error::{AssetError, CommandError, EngineError, InterfaceError};
use crate::interface::{InterfaceBinding, InterfaceResolver};

pub fn identity() -> TunnelIdentity {
	TunnelIdentity::generate(TunnelAddresses {
		host: Ipv4Addr::new(10, 33, 33, 1),
		vm: Ipv4Addr::new(10, 33, 33, 2),
		listen_port: 3333,
	})
}

pub fn binding() -> InterfaceBinding {
	InterfaceBinding {
		name: "dockbridge".to_string(),
		index: 42,
		host_address: Ipv4Addr::new(10, 33, 33, 1),
		peer_address: Ipv4Addr::new(10, 33, 33, 2),
	}
}

pub fn local_network(id: &str, subnets: &[&str]) -> NetworkRecord {
	NetworkRecord {
		id: id.to_string(),
		name: format!("{id}_default"),
		scope: NetworkScope::Local,
		subnets: subnets.iter().map(|s| s.to_string()).collect(),
	}
}

struct FailureRule {
	fragment: String,
	remaining: usize,
	stderr: String,
}

/// Records every command and fails those matching a scripted fragment.
#[derive(Default)]
pub struct RecordingRunner {
	commands: Mutex<Vec<String>>,
	rules: Mutex<Vec<FailureRule>>,
}

impl RecordingRunner {
	pub fn new() -> Self {
		Self::default()
	}

	/// The next `times` commands containing `fragment` fail with `stderr`.
	pub fn fail_when(&self, fragment: &str, times: usize, stderr: &str) {
		self.rules.lock().unwrap().push(FailureRule {
			fragment: fragment.to_string(),
			remaining: times,
			stderr: stderr.to_string(),
		});
	}

	pub fn commands(&self) -> Vec<String> {
		self.commands.lock().unwrap().clone()
	}
}

#[async_trait]
impl CommandRunner for RecordingRunner {
	async fn run(&self, command: &CommandLine) -> Result<CommandOutput, CommandError> {
		let rendered = command.to_string();
		self.commands.lock().unwrap().push(rendered.clone());

		let mut rules = self.rules.lock().unwrap();
		if let Some(rule) = rules
			.iter_mut()
			.find(|r| r.remaining > 0 && rendered.contains(&r.fragment))
		{
			rule.remaining -= 1;
			return Err(CommandError::Failed {
				command: rendered,
				status: "exit status: 1".to_string(),
				stdout: String::new(),
				stderr: rule.stderr.clone(),
			});
		}
		Ok(CommandOutput::default())
	}
}

pub struct StaticResolver {
	index: Mutex<Option<u32>>,
}

impl StaticResolver {
	pub fn new(index: u32) -> Self {
		Self {
			index: Mutex::new(Some(index)),
		}
	}

	pub fn set_index(&self, index: Option<u32>) {
		*self.index.lock().unwrap() = index;
	}
}

impl InterfaceResolver for StaticResolver {
	fn resolve_index(&self, name: &str) -> Result<u32, InterfaceError> {
		self.index.lock().unwrap().ok_or_else(|| InterfaceError::NotFound {
			name: name.to_string(),
		})
	}
}

pub struct MemoryAssets {
	files: HashMap<String, Vec<u8>>,
}

impl MemoryAssets {
	pub fn new<'a>(files: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
		Self {
			files: files
				.into_iter()
				.map(|(name, bytes)| (name.to_string(), bytes.to_vec()))
				.collect(),
		}
	}
}

impl AssetSource for MemoryAssets {
	fn read_asset(&self, name: &str) -> Result<&[u8], AssetError> {
		self
			.files
			.get(name)
			.map(Vec::as_slice)
			.ok_or_else(|| AssetError::NotBundled {
				name: name.to_string(),
			})
	}
}

pub type EventSender = mpsc::UnboundedSender<Result<NetworkEvent, EngineError>>;
type EventReceiver = mpsc::UnboundedReceiver<Result<NetworkEvent, EngineError>>;
pub type LogSender = mpsc::UnboundedSender<Result<String, EngineError>>;
type LogReceiver = mpsc::UnboundedReceiver<Result<String, EngineError>>;

/// Engine double. Pings succeed unless scripted otherwise, and each call to
/// `network_events` consumes one session opened with [`Self::open_event_session`].
/// Without a session the event stream stays pending.
pub struct ScriptedEngine {
	ping_results: Mutex<VecDeque<Result<(), EngineError>>>,
	ping_count: Mutex<usize>,
	networks: Mutex<HashMap<String, NetworkRecord>>,
	network_order: Mutex<Vec<String>>,
	image_present: Mutex<bool>,
	pull_count: Mutex<usize>,
	create_error: Mutex<Option<EngineError>>,
	created: Mutex<Vec<HelperContainerSpec>>,
	started: Mutex<Vec<String>>,
	log_lines: Mutex<Vec<String>>,
	log_error: Mutex<Option<EngineError>>,
	log_sessions: Mutex<VecDeque<LogReceiver>>,
	event_sessions: Mutex<VecDeque<EventReceiver>>,
	event_subscriptions: Mutex<usize>,
}

impl Default for ScriptedEngine {
	fn default() -> Self {
		Self {
			ping_results: Mutex::new(VecDeque::new()),
			ping_count: Mutex::new(0),
			networks: Mutex::new(HashMap::new()),
			network_order: Mutex::new(Vec::new()),
			image_present: Mutex::new(true),
			pull_count: Mutex::new(0),
			create_error: Mutex::new(None),
			created: Mutex::new(Vec::new()),
			started: Mutex::new(Vec::new()),
			log_lines: Mutex::new(Vec::new()),
			log_error: Mutex::new(None),
			log_sessions: Mutex::new(VecDeque::new()),
			event_sessions: Mutex::new(VecDeque::new()),
			event_subscriptions: Mutex::new(0),
		}
	}
}

impl ScriptedEngine {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push_ping_results(&self, results: impl IntoIterator<Item = Result<(), EngineError>>) {
		self.ping_results.lock().unwrap().extend(results);
	}

	pub fn ping_count(&self) -> usize {
		*self.ping_count.lock().unwrap()
	}

	/// Replaces the networks returned by `list_networks`.
	pub fn set_networks(&self, records: impl IntoIterator<Item = NetworkRecord>) {
		let mut networks = self.networks.lock().unwrap();
		let mut order = self.network_order.lock().unwrap();
		networks.clear();
		order.clear();
		for record in records {
			order.push(record.id.clone());
			networks.insert(record.id.clone(), record);
		}
	}

	/// Makes a network inspectable without listing it, as for a network
	/// created after setup.
	pub fn add_inspectable(&self, record: NetworkRecord) {
		self.networks.lock().unwrap().insert(record.id.clone(), record);
	}

	pub fn set_image_present(&self, present: bool) {
		*self.image_present.lock().unwrap() = present;
	}

	pub fn pull_count(&self) -> usize {
		*self.pull_count.lock().unwrap()
	}

	pub fn fail_create(&self, err: EngineError) {
		*self.create_error.lock().unwrap() = Some(err);
	}

	pub fn created_containers(&self) -> Vec<HelperContainerSpec> {
		self.created.lock().unwrap().clone()
	}

	pub fn started_containers(&self) -> Vec<String> {
		self.started.lock().unwrap().clone()
	}

	pub fn set_container_logs<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
		*self.log_lines.lock().unwrap() = lines.into_iter().map(str::to_string).collect();
	}

	pub fn fail_logs(&self, err: EngineError) {
		*self.log_error.lock().unwrap() = Some(err);
	}

	/// Queues a log stream for the next followed container. It ends when the
	/// sender is dropped.
	pub fn open_log_session(&self) -> LogSender {
		let (tx, rx) = mpsc::unbounded();
		self.log_sessions.lock().unwrap().push_back(rx);
		tx
	}

	/// Queues an event stream for the next subscriber.
	pub fn open_event_session(&self) -> EventSender {
		let (tx, rx) = mpsc::unbounded();
		self.event_sessions.lock().unwrap().push_back(rx);
		tx
	}

	pub fn event_subscriptions(&self) -> usize {
		*self.event_subscriptions.lock().unwrap()
	}
}

#[async_trait]
impl EngineClient for ScriptedEngine {
	async fn ping(&self) -> Result<(), EngineError> {
		*self.ping_count.lock().unwrap() += 1;
		self.ping_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
	}

	async fn list_networks(&self) -> Result<Vec<NetworkRecord>, EngineError> {
		let networks = self.networks.lock().unwrap();
		Ok(self
			.network_order
			.lock()
			.unwrap()
			.iter()
			.filter_map(|id| networks.get(id).cloned())
			.collect())
	}

	async fn inspect_network(&self, id: &str) -> Result<NetworkRecord, EngineError> {
		self
			.networks
			.lock()
			.unwrap()
			.get(id)
			.cloned()
			.ok_or_else(|| EngineError::request("inspect_network", format!("network {id} not found")))
	}

	async fn image_exists(&self, _image: &str) -> Result<bool, EngineError> {
		Ok(*self.image_present.lock().unwrap())
	}

	async fn pull_image(&self, _image: &str) -> Result<(), EngineError> {
		*self.pull_count.lock().unwrap() += 1;
		*self.image_present.lock().unwrap() = true;
		Ok(())
	}

	async fn create_container(&self, spec: &HelperContainerSpec) -> Result<String, EngineError> {
		if let Some(err) = self.create_error.lock().unwrap().take() {
			return Err(err);
		}
		let mut created = self.created.lock().unwrap();
		created.push(spec.clone());
		Ok(format!("container-{}", created.len()))
	}

	async fn start_container(&self, id: &str) -> Result<(), EngineError> {
		self.started.lock().unwrap().push(id.to_string());
		Ok(())
	}

	fn container_logs<'a>(&'a self, _id: &'a str) -> BoxStream<'a, Result<String, EngineError>> {
		if let Some(rx) = self.log_sessions.lock().unwrap().pop_front() {
			return rx.boxed();
		}
		let mut items: Vec<Result<String, EngineError>> = self
			.log_lines
			.lock()
			.unwrap()
			.iter()
			.cloned()
			.map(Ok)
			.collect();
		if let Some(err) = self.log_error.lock().unwrap().take() {
			items.push(Err(err));
		}
		stream::iter(items).boxed()
	}

	fn network_events(&self) -> BoxStream<'_, Result<NetworkEvent, EngineError>> {
		*self.event_subscriptions.lock().unwrap() += 1;
		match self.event_sessions.lock().unwrap().pop_front() {
			Some(rx) => rx.boxed(),
			None => stream::pending::<Result<NetworkEvent, EngineError>>().boxed(),
		}
	}
}
