//! Stream Server - 工作流事件流服务
//!
//! # 架构概述
//!
//! - **事件日志** (`storage`): 每个 `(workflow, trigger)` 流的有序、限时事件存储 (redb)
//! - **执行快照** (`storage::snapshot`): 每次执行的最新快照
//! - **事件总线** (`bus`): durable topic + consumer group + 订阅表
//! - **SSE 网关** (`gateway`): greeting、可选回放、实时推送
//! - **Correlation** (`correlation`): 跨异步边界传递 correlation id
//! - **HTTP API** (`api`): 生产者与查询接口
//!
//! # 模块结构
//!
//! ```text
//! stream-server/src/
//! ├── core/          # 配置、状态、后台任务、错误
//! ├── storage/       # 事件日志、快照
//! ├── bus/           # topic、router、registry、handler
//! ├── gateway/       # SSE 会话
//! ├── api/           # HTTP 路由和处理器
//! ├── utils/         # 错误、日志
//! ├── correlation.rs
//! └── producer.rs
//! ```

pub mod api;
pub mod bus;
pub mod core;
pub mod correlation;
pub mod gateway;
pub mod producer;
pub mod storage;
pub mod utils;

// Re-export 公共类型
pub use bus::{EventBus, EventRouter, RouterState};
pub use core::{Config, Server, ServerState};
pub use producer::EventPublisher;
pub use storage::{EventLogStore, SnapshotStore, StoreError};
pub use utils::{AppError, AppResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

/// Load `.env`, create the work directory, initialize logging
pub fn setup_environment() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenv::dotenv();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.work_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create work dir {}: {}", config.work_dir, e))?;
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create log dir {}: {}", dir, e))?;
    }

    init_logger_with_file(
        Some(&config.log_level),
        Some(config.log_json),
        config.log_dir.as_deref(),
    );
    Ok(())
}

pub fn print_banner() {
    println!(
        r#"
     _                                  
 ___| |_ _ __ ___  __ _ _ __ ___        
/ __| __| '__/ _ \/ _` | '_ ` _ \       
\__ \ |_| | |  __/ (_| | | | | | |      
|___/\__|_|  \___|\__,_|_| |_| |_|      
    "#
    );
}
