use criterion::{black_box, criterion_group, criterion_main, Criterion};
use htmlsnap::config::RenderStrategy;
use htmlsnap::ui::index_page;
use htmlsnap::{ConversionRequest, RenderSettings};

const BANNER: &str = r#"<div style="width:100%;height:100%;display:flex;align-items:center;justify-content:center;background:linear-gradient(135deg,#4f46e5,#9333ea)">
<h1 style="font:700 96px system-ui;color:#fff">Launch day</h1>
</div>"#;

fn bench_validate(c: &mut Criterion) {
    c.bench_function("validate_request", |b| {
        b.iter(|| ConversionRequest::new(black_box(BANNER), black_box("png")).unwrap())
    });

    let padded = format!("{}{}", " \n".repeat(4096), BANNER);
    c.bench_function("validate_request_leading_whitespace", |b| {
        b.iter(|| ConversionRequest::new(black_box(padded.as_str()), black_box("jpg")).unwrap())
    });
}

fn bench_large_request(c: &mut Criterion) {
    let large = BANNER.repeat(4096);
    c.bench_function("validate_request_large", |b| {
        b.iter(|| ConversionRequest::new(black_box(large.as_str()), black_box("png")).unwrap())
    });
}

fn bench_index_page(c: &mut Criterion) {
    let settings = RenderSettings::default();
    c.bench_function("index_page_client", |b| {
        b.iter(|| index_page(black_box(RenderStrategy::Client), black_box(&settings)))
    });
}

criterion_group!(benches, bench_validate, bench_large_request, bench_index_page);
criterion_main!(benches);
