//! Criterion benchmark for HTTP head codec
//!
//! Run with: cargo bench --bench codec_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use edgeio::core::{Arena, Buffer, View};
use edgeio::protocol::{
    add_header, header_completed, parse_request, start_response, write_eoh, StatusCode, Version,
};

const BROWSER_REQUEST: &[u8] = b"GET /static/app.js?v=42 HTTP/1.1\r\n\
Host: www.example.com\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0\r\n\
Accept: */*\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Referer: https://www.example.com/\r\n\
Connection: keep-alive\r\n\
Sec-Fetch-Dest: script\r\n\
Sec-Fetch-Mode: no-cors\r\n\
Sec-Fetch-Site: same-origin\r\n\
\r\n";

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Bytes(BROWSER_REQUEST.len() as u64));

    group.bench_function("header_completed", |b| {
        let view = View::new(BROWSER_REQUEST);
        b.iter(|| black_box(header_completed(black_box(&view))));
    });

    // Fresh arena per request, as a connection would have
    group.bench_function("parse_request", |b| {
        b.iter(|| {
            let arena = Arena::new();
            let request = parse_request(View::new(black_box(BROWSER_REQUEST)), &arena).unwrap();
            black_box(request.headers.len());
        });
    });

    group.finish();
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Elements(1));

    group.bench_function("response_head", |b| {
        let mut buffer = Buffer::new(256);
        b.iter(|| {
            let mut writer = buffer.writer();
            start_response(&mut writer, StatusCode::OK, "OK", Version::Http11);
            add_header(&mut writer, "Content-Type", "text/plain");
            add_header(&mut writer, "Content-Length", "18");
            write_eoh(&mut writer);
            black_box(writer.len());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_write);
criterion_main!(benches);
