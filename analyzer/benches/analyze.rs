use analyzer::{AnalyzeOptions, Analyzer, Thresholds};
use chrome_trace_format::{ThreadKey, TraceData, TraceEvent};
use divan::Bencher;
use serde_json::json;
use std::hint::black_box;

#[global_allocator]
static ALLOC: divan::AllocProfiler = divan::AllocProfiler::system();

const MAIN: ThreadKey = ThreadKey { pid: 1, tid: 1 };
const COMPOSITOR: ThreadKey = ThreadKey { pid: 1, tid: 2 };
const GPU_MAIN: ThreadKey = ThreadKey { pid: 2, tid: 1 };

/// A renderer trace with `frames` frames of mixed main-thread, paint and
/// GPU work.
fn synthetic_trace(frames: u64) -> TraceData {
    let mut events = vec![
        TraceEvent::thread_name(MAIN, "CrRendererMain"),
        TraceEvent::thread_name(COMPOSITOR, "Compositor"),
    ];
    for frame in 0..frames {
        let ts = frame * 16_667;
        events.push(TraceEvent::instant("DrawFrame", "devtools.timeline.frame", COMPOSITOR, ts));
        events.push(TraceEvent::complete("RunTask", "toplevel", MAIN, ts, 4_000 + (frame % 20) * 3_000));
        for i in 0..4 {
            events.push(
                TraceEvent::complete("Layout", "devtools.timeline", MAIN, ts + 500 + i * 600, 400)
                    .with_args(json!({"beginData": {"dirtyObjects": 12}})),
            );
            events.push(TraceEvent::complete("UpdateLayoutTree", "devtools.timeline", MAIN, ts + 800 + i * 600, 200));
        }
        events.push(
            TraceEvent::complete("Paint", "devtools.timeline", MAIN, ts + 9_000, 2_500)
                .with_args(json!({"data": {"layerId": frame % 7}})),
        );
        events.push(TraceEvent::complete("CommandBufferProxyImpl::Finish", "gpu", GPU_MAIN, ts + 12_000, 1_500));
    }
    TraceData::new(events)
}

#[divan::bench(args = [100, 1_000, 5_000])]
fn analyze(bencher: Bencher, frames: u64) {
    let trace = synthetic_trace(frames);
    let analyzer = Analyzer::with_default_detectors(&Thresholds::default());
    let options = AnalyzeOptions::default();
    bencher.bench_local(|| black_box(analyzer.analyze(black_box(&trace), &options)));
}

#[divan::bench(args = [100, 1_000, 5_000])]
fn analyze_parallel(bencher: Bencher, frames: u64) {
    let trace = synthetic_trace(frames);
    let analyzer = Analyzer::with_default_detectors(&Thresholds::default());
    let options = AnalyzeOptions::builder().parallel(true).build();
    bencher.bench_local(|| black_box(analyzer.analyze(black_box(&trace), &options)));
}

fn main() {
    divan::main();
}
