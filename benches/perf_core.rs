use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fixloop::repair::{diagnostic, extract, patch};

fn synthetic_completion(filler_lines: usize) -> String {
    let mut text = String::from("Here is the corrected function. The bug was an off-by-one.\n\n");
    for i in 0..filler_lines {
        text.push_str(&format!("Line {i}: the loop bound was wrong so the last element was skipped.\n"));
    }
    text.push_str("```python\ndef sum_to(n: int) -> int:\n    total = 0\n");
    for i in 0..filler_lines {
        text.push_str(&format!("    total += {i} * 0\n"));
    }
    text.push_str("    for i in range(n + 1):\n        total += i\n    return total\n```\n");
    text
}

fn synthetic_traceback(frames: usize) -> String {
    let mut text = String::from("Traceback (most recent call last):\n");
    for i in 0..frames {
        text.push_str(&format!(
            "  File \"/tmp/prog_{i}.py\", line {i}, in helper_{i}\n    value = helper_{}(x)\n",
            i + 1
        ));
    }
    text.push_str("UnboundLocalError: cannot access local variable 'total' where it is not associated with a value\n");
    text
}

fn bench_extract(c: &mut Criterion) {
    let fenced = synthetic_completion(200);
    let unfenced = fenced.replace("```python\n", "").replace("```\n", "");

    c.bench_function("extract_fenced", |b| {
        b.iter(|| extract::extract(black_box(&fenced), "sum_to"))
    });

    c.bench_function("extract_by_name", |b| {
        b.iter(|| extract::extract(black_box(&unfenced), "sum_to"))
    });
}

fn bench_classify(c: &mut Criterion) {
    let traceback = synthetic_traceback(64);

    c.bench_function("classify_traceback", |b| {
        b.iter(|| diagnostic::classify(black_box(&traceback)))
    });
}

fn bench_unbound_patch(c: &mut Criterion) {
    let code = extract::extract(&synthetic_completion(200), "sum_to");

    c.bench_function("apply_unbound_local", |b| {
        b.iter(|| patch::apply_unbound_local(black_box(&code), "total"))
    });
}

criterion_group!(perf_core, bench_extract, bench_classify, bench_unbound_patch);
criterion_main!(perf_core);
