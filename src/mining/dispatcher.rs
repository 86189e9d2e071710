use crate::api::{BackendApi, CommandReply, RejectionDetail, StartMiningRequest};
use crate::capability::ResourceEnvelope;
use crate::error::{DispatchError, FieldViolation};
use crate::mining::{MiningConfiguration, MiningStatus};
use crate::state::{StoreReader, ValueStore};
use crate::validation::ConfigurationValidator;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 下发命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchCommand {
    Start,
    Stop,
    /// 修改配置；挖矿中则在后端重启会话
    Update,
}

impl fmt::Display for DispatchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchCommand::Start => "start",
            DispatchCommand::Stop => "stop",
            DispatchCommand::Update => "update",
        };
        f.write_str(s)
    }
}

/// 下发成功的结果
///
/// 成功不代表挖矿状态已改变，以下一次对账后的 [`MiningStatus`] 为准。
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub command: DispatchCommand,
    pub message: String,
    /// 是否向后端发出了请求
    pub sent: bool,
}

/// 配置下发器
///
/// 已接受配置的唯一写入者；只在后端确认后写入。
pub struct ConfigurationDispatcher {
    backend: Arc<dyn BackendApi>,
    envelope: StoreReader<ResourceEnvelope>,
    status: StoreReader<MiningStatus>,
    accepted: ValueStore<MiningConfiguration>,
    disposed: Arc<AtomicBool>,
}

impl ConfigurationDispatcher {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        envelope: StoreReader<ResourceEnvelope>,
        status: StoreReader<MiningStatus>,
    ) -> Self {
        Self {
            backend,
            envelope,
            status,
            accepted: ValueStore::new(),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 最近一次被后端接受的配置
    pub fn accepted_configuration(&self) -> StoreReader<MiningConfiguration> {
        self.accepted.reader()
    }

    /// 会话释放后，飞行中的请求照常完成，但结果不再写入
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub async fn submit(
        &self,
        command: DispatchCommand,
        config: &MiningConfiguration,
    ) -> Result<DispatchOutcome, DispatchError> {
        match command {
            DispatchCommand::Start => self.start(config).await,
            DispatchCommand::Stop => self.stop().await,
            DispatchCommand::Update => self.update(config).await,
        }
    }

    /// 校验并启动挖矿
    pub async fn start(&self, config: &MiningConfiguration) -> Result<DispatchOutcome, DispatchError> {
        let request = self.prepare(config)?;

        info!(
            "Submitting start: threads={}, mode={:?}, coin={}",
            request.threads, request.mode, request.coin.symbol
        );
        let reply = self.backend.start_mining(&request).await?;
        let message = accepted_message(DispatchCommand::Start, reply)?;

        self.record_accepted(config);
        Ok(DispatchOutcome {
            command: DispatchCommand::Start,
            message,
            sent: true,
        })
    }

    /// 停止挖矿；已停止时由后端裁决，不在本地拦截
    pub async fn stop(&self) -> Result<DispatchOutcome, DispatchError> {
        info!("Submitting stop");
        let reply = self.backend.stop_mining().await?;
        let message = accepted_message(DispatchCommand::Stop, reply)?;

        Ok(DispatchOutcome {
            command: DispatchCommand::Stop,
            message,
            sent: true,
        })
    }

    /// 修改配置
    pub async fn update(&self, config: &MiningConfiguration) -> Result<DispatchOutcome, DispatchError> {
        let request = self.prepare(config)?;

        let mining = self.status.latest().is_some_and(|s| s.is_mining);
        if !mining {
            self.record_accepted(config);
            return Ok(DispatchOutcome {
                command: DispatchCommand::Update,
                message: "configuration saved, applies on next start".to_string(),
                sent: false,
            });
        }

        info!("Restarting mining session with updated configuration");
        let reply = self.backend.stop_mining().await?;
        accepted_message(DispatchCommand::Stop, reply)?;

        let reply = self.backend.start_mining(&request).await?;
        let message = accepted_message(DispatchCommand::Update, reply)?;

        self.record_accepted(config);
        Ok(DispatchOutcome {
            command: DispatchCommand::Update,
            message,
            sent: true,
        })
    }

    fn prepare(&self, config: &MiningConfiguration) -> Result<StartMiningRequest, DispatchError> {
        let envelope = self.envelope.latest();
        ConfigurationValidator::validate(config, envelope.as_deref()).map_err(|violations| {
            warn!("Configuration rejected locally: {} problem(s)", violations.len());
            DispatchError::Invalid(violations)
        })?;

        StartMiningRequest::from_config(config).ok_or_else(|| {
            DispatchError::Invalid(vec![FieldViolation::new("coin", "a coin must be selected")])
        })
    }

    fn record_accepted(&self, config: &MiningConfiguration) {
        if self.disposed.load(Ordering::SeqCst) {
            debug!("Session disposed, discarding dispatch result");
            return;
        }
        self.accepted.publish(config.clone());
    }
}

fn accepted_message(command: DispatchCommand, reply: CommandReply) -> Result<String, DispatchError> {
    match reply {
        CommandReply::Accepted { message } => {
            info!("Backend accepted {}: {}", command, message);
            Ok(message)
        }
        CommandReply::Rejected(RejectionDetail::Fields(violations)) => {
            warn!("Backend rejected {} with {} field problem(s)", command, violations.len());
            Err(DispatchError::Rejected(violations))
        }
        CommandReply::Rejected(RejectionDetail::Message(message)) => {
            warn!("Backend rejected {}: {}", command, message);
            Err(DispatchError::Failed(message))
        }
    }
}
