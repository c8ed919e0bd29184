use criterion::{black_box, criterion_group, criterion_main, Criterion};

use gifttest_core::bank::{CategoryFilter, QuestionBank};
use gifttest_core::parser::parse;
use gifttest_core::scoring::score;
use gifttest_core::session::TestSession;

fn bank(n: usize) -> QuestionBank {
    let text: String = (0..n)
        .map(|i| format!("::Q{i}:: Question {i}? {{=right ~wrong ~other}}\n\n"))
        .collect();
    parse(&text, "bench").0
}

fn finished_session(bank: &QuestionBank, count: usize, end_early: bool) -> TestSession {
    let ids = bank.select(&[CategoryFilter::All], count, Some(7)).unwrap();
    let mut session = TestSession::new();
    session.start(ids.clone()).unwrap();
    for (i, id) in ids.iter().enumerate() {
        session.answer(*id, i % 3).unwrap();
        if end_early && i == count / 2 {
            break;
        }
        session.next().unwrap();
    }
    if end_early {
        session.end_now().unwrap();
    } else {
        session.finish().unwrap();
    }
    session
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("score");
    let bank = bank(500);

    group.bench_function("completed_20", |b| {
        let session = finished_session(&bank, 20, false);
        b.iter(|| score(black_box(&session), black_box(&bank)))
    });

    group.bench_function("completed_100", |b| {
        let session = finished_session(&bank, 100, false);
        b.iter(|| score(black_box(&session), black_box(&bank)))
    });

    group.bench_function("ended_early_100", |b| {
        let session = finished_session(&bank, 100, true);
        b.iter(|| score(black_box(&session), black_box(&bank)))
    });

    group.finish();
}

fn bench_select(c: &mut Criterion) {
    let bank = bank(2000);
    c.bench_function("select_100_of_2000", |b| {
        b.iter(|| bank.select(black_box(&[CategoryFilter::All]), 100, Some(1)))
    });
}

criterion_group!(benches, bench_score, bench_select);
criterion_main!(benches);
