use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// 导入状态枚举
///
/// 表示导入任务的各个阶段
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ImportStatus {
    /// 等待处理
    Pending,
    /// 正在导入
    Ingesting,
    /// 完成
    Completed,
    /// 失败（包含错误信息）
    Failed(String),
}

/// 导入任务
///
/// 一个任务对应一个电子书文件，书籍记录在导入时才创建
#[derive(Clone, Debug)]
pub struct ImportTask {
    pub task_id: u64,
    pub file_path: PathBuf,
    /// 覆盖默认的书名（文件名）
    pub title: Option<String>,
    pub status: ImportStatus,
    pub created_at: DateTime<Utc>,
}

/// 导入队列
///
/// 不同书籍之间没有共享状态，可以并发导入；同一本书内部始终顺序处理
pub struct ImportQueue {
    /// 待处理任务队列
    tasks: Mutex<VecDeque<ImportTask>>,
    /// 正在处理的任务（task_id -> task）
    active_tasks: Mutex<HashMap<u64, ImportTask>>,
    /// 已结束的任务，按结束顺序
    finished: Mutex<Vec<ImportTask>>,
    /// 最大并发任务数
    max_concurrent: usize,
    next_id: AtomicU64,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| IngestError::Queue(format!("锁定{}失败: {}", what, e)))
}

impl ImportQueue {
    /// 创建新的导入队列
    ///
    /// # 参数
    /// - `max_concurrent`: 最大并发任务数，至少为 1
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            active_tasks: Mutex::new(HashMap::new()),
            finished: Mutex::new(Vec::new()),
            max_concurrent: max_concurrent.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// 将文件加入队列
    ///
    /// # 返回
    /// 新任务的 ID
    pub fn enqueue(&self, file_path: impl Into<PathBuf>, title: Option<String>) -> Result<u64> {
        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut tasks = lock(&self.tasks, "任务队列")?;
        tasks.push_back(ImportTask {
            task_id,
            file_path: file_path.into(),
            title,
            status: ImportStatus::Pending,
            created_at: Utc::now(),
        });
        Ok(task_id)
    }

    /// 取出下一个任务并标记为活动
    ///
    /// # 返回
    /// - Ok(Some(task)): 成功取出任务
    /// - Ok(None): 队列为空或已达并发上限
    pub fn start_next(&self) -> Result<Option<ImportTask>> {
        let mut tasks = lock(&self.tasks, "任务队列")?;
        let mut active = lock(&self.active_tasks, "活动任务")?;

        if active.len() >= self.max_concurrent {
            return Ok(None);
        }

        let Some(mut task) = tasks.pop_front() else {
            return Ok(None);
        };
        task.status = ImportStatus::Ingesting;
        active.insert(task.task_id, task.clone());
        Ok(Some(task))
    }

    /// 结束任务
    ///
    /// # 参数
    /// - `task_id`: 任务 ID
    /// - `status`: `Completed` 或 `Failed`
    pub fn finish(&self, task_id: u64, status: ImportStatus) -> Result<()> {
        let mut active = lock(&self.active_tasks, "活动任务")?;
        if let Some(mut task) = active.remove(&task_id) {
            task.status = status;
            lock(&self.finished, "已完成任务")?.push(task);
        }
        Ok(())
    }

    /// 获取队列中的任务数量
    pub fn queue_size(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// 获取活动任务数量
    pub fn active_count(&self) -> usize {
        self.active_tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// 已结束的任务
    pub fn finished(&self) -> Vec<ImportTask> {
        self.finished.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// 用 `max_concurrent` 个线程处理完队列中的全部任务
    ///
    /// `handler` 在工作线程中执行，需要自行打开数据库连接。单个任务失败只记录，
    /// 不影响其他任务
    ///
    /// # 返回
    /// 每个任务的结果，按完成顺序
    pub fn drain<R, F>(&self, handler: F) -> Vec<(ImportTask, Result<R>)>
    where
        R: Send,
        F: Fn(&ImportTask) -> Result<R> + Sync,
    {
        let results = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..self.max_concurrent {
                scope.spawn(|| loop {
                    let task = match self.start_next() {
                        Ok(Some(task)) => task,
                        Ok(None) => {
                            if self.queue_size() == 0 {
                                break;
                            }
                            thread::sleep(Duration::from_millis(20));
                            continue;
                        }
                        Err(e) => {
                            error!("获取任务失败: {}", e);
                            break;
                        }
                    };

                    info!("开始导入 {}", task.file_path.display());
                    let result = handler(&task);
                    let status = match &result {
                        Ok(_) => ImportStatus::Completed,
                        Err(e) => {
                            error!("导入任务失败 ({}): {}", task.file_path.display(), e);
                            ImportStatus::Failed(e.to_string())
                        }
                    };
                    if let Err(e) = self.finish(task.task_id, status.clone()) {
                        error!("结束任务失败: {}", e);
                    }

                    let mut task = task;
                    task.status = status;
                    if let Ok(mut results) = results.lock() {
                        results.push((task, result));
                    }
                });
            }
        });

        results.into_inner().unwrap_or_default()
    }
}

impl Default for ImportQueue {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_CONCURRENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn queue_with(n: usize, max_concurrent: usize) -> ImportQueue {
        let queue = ImportQueue::new(max_concurrent);
        for i in 1..=n {
            queue.enqueue(format!("/test/book{}.epub", i), None).unwrap();
        }
        queue
    }

    #[test]
    fn test_queue_creation() {
        let queue = ImportQueue::new(3);
        assert_eq!(queue.queue_size(), 0);
        assert_eq!(queue.active_count(), 0);
    }

    #[test]
    fn test_enqueue_start_in_order() {
        let queue = queue_with(3, 3);
        assert_eq!(queue.queue_size(), 3);

        for i in 1..=3 {
            let task = queue.start_next().unwrap().unwrap();
            assert_eq!(task.task_id, i);
            assert_eq!(task.status, ImportStatus::Ingesting);
        }
        assert_eq!(queue.queue_size(), 0);
        assert!(queue.start_next().unwrap().is_none());
    }

    #[test]
    fn test_concurrent_limit() {
        let queue = queue_with(3, 2);

        let first = queue.start_next().unwrap().unwrap();
        queue.start_next().unwrap().unwrap();
        assert_eq!(queue.active_count(), 2);

        // 已达上限，第三个任务留在队列中
        assert!(queue.start_next().unwrap().is_none());
        assert_eq!(queue.queue_size(), 1);

        queue.finish(first.task_id, ImportStatus::Completed).unwrap();
        assert!(queue.start_next().unwrap().is_some());
    }

    #[test]
    fn test_finish_records_status() {
        let queue = queue_with(1, 3);
        let task = queue.start_next().unwrap().unwrap();
        assert_eq!(queue.active_count(), 1);
        assert!(queue.finished().is_empty());

        // 未知任务直接忽略
        queue.finish(999, ImportStatus::Completed).unwrap();
        assert!(queue.finished().is_empty());

        queue
            .finish(task.task_id, ImportStatus::Failed("坏文件".to_string()))
            .unwrap();
        assert_eq!(queue.active_count(), 0);
        let finished = queue.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, ImportStatus::Failed("坏文件".to_string()));
    }

    #[test]
    fn test_drain_runs_every_task() {
        let queue = queue_with(5, 2);
        let calls = AtomicUsize::new(0);

        let results = queue.drain(|task| {
            calls.fetch_add(1, Ordering::SeqCst);
            if task.file_path.ends_with("book3.epub") {
                Err(IngestError::Archive("bad".to_string()))
            } else {
                Ok(task.task_id)
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|(_, r)| r.is_err()).count(), 1);
        assert_eq!(queue.queue_size(), 0);
        assert_eq!(queue.active_count(), 0);
        assert_eq!(queue.finished().len(), 5);
    }
}
