//! 并行调度：Rayon 线程池处理 + 单线程按序汇总
//!
//! worker 把 (idx, 结果) 经 channel 发回调用线程，调用线程按 idx 重排后依次交给 sink，
//! 因此依赖遍历顺序的汇总（"每类首个命中"、首次出现顺序）与串行路径完全一致。
use crossbeam_channel as channel;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// 解析线程参数：None 或 0 表示自动（等于 CPU 核数）
pub(crate) fn resolve_threads(requested: Option<usize>) -> usize {
    match requested {
        Some(n) if n >= 1 => n,
        _ => num_cpus::get(),
    }
}

/// 对 `items` 逐个执行 `work`，并按原顺序把结果交给 `sink`
pub(crate) fn for_each_ordered<T, R, F, S>(items: &[T], threads: usize, work: F, mut sink: S)
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
    S: FnMut(usize, R),
{
    if threads <= 1 || items.len() < 2 {
        run_serial(items, &work, &mut sink);
        return;
    }
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "build rayon pool failed, falling back to serial");
            run_serial(items, &work, &mut sink);
            return;
        }
    };

    let (tx, rx) = channel::bounded::<(usize, R)>(256);
    let work = &work;
    std::thread::scope(|s| {
        s.spawn(move || {
            pool.install(|| {
                items.par_iter().enumerate().for_each_with(tx, |tx, (idx, item)| {
                    let _ = tx.send((idx, work(item)));
                });
            });
            // 结束后 Sender 全部被丢弃，Receiver 将收到关闭信号
        });

        let mut next_idx = 0usize;
        let mut buffer: BTreeMap<usize, R> = BTreeMap::new();
        while let Ok((idx, r)) = rx.recv() {
            buffer.insert(idx, r);
            while let Some(r) = buffer.remove(&next_idx) {
                sink(next_idx, r);
                next_idx += 1;
            }
        }
    });
}

fn run_serial<T, R, F, S>(items: &[T], work: &F, sink: &mut S)
where
    F: Fn(&T) -> R,
    S: FnMut(usize, R),
{
    for (idx, item) in items.iter().enumerate() {
        sink(idx, work(item));
    }
}
