use crate::core::Result;
use log::info;
use tokio::runtime::{Builder, Runtime};

/// 后台任务执行器：网络请求在这里执行，控制线程永不阻塞
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// 基于 tokio 运行时的执行器（阻塞型 HTTP 调用走 spawn_blocking）
pub struct RuntimeSpawner {
    runtime: Runtime,
}

impl RuntimeSpawner {
    pub fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("myy-net")
            .enable_all()
            .build()?;
        info!("🧵 网络工作线程池启动（{} 线程）", worker_threads.max(1));
        Ok(Self { runtime })
    }
}

impl TaskSpawner for RuntimeSpawner {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        // 结果通过通道回传，这里不需要 JoinHandle
        drop(self.runtime.spawn_blocking(task));
    }
}
