#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};

use sparhund_protocols::{detect_content_type, parse_ident, parse_request, parse_response};

const LIMIT: usize = 10 * 1024 * 1024;

const HTTP_REQUEST: &[u8] = b"GET /search?q=packet+capture&lang=en HTTP/1.1\r\n\
Host: www.example.com\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0\r\n\
Accept: text/html,application/xhtml+xml\r\n\
Referer: https://www.example.com/\r\n\
Cookie: session=abc123; theme=dark\r\n\r\n";

const HTTP_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Server: nginx/1.18.0\r\n\
Content-Type: text/html\r\n\
Transfer-Encoding: chunked\r\n\
Set-Cookie: id=a3fWa; Path=/; HttpOnly\r\n\r\n\
18\r\n<html><body>hello</body>\r\n\
7\r\n</html>\r\n\
0\r\n\r\n";

const SSH_IDENT: &[u8] = b"SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1\r\n";

fn benchmark_http_request(c: &mut Criterion) {
    c.bench_function("http_request_parsing", |b| {
        b.iter(|| {
            black_box(parse_request(black_box(HTTP_REQUEST), LIMIT)).unwrap();
        })
    });
}

fn benchmark_http_response(c: &mut Criterion) {
    c.bench_function("http_response_parsing", |b| {
        b.iter(|| {
            black_box(parse_response(black_box(HTTP_RESPONSE), Some("GET"), false, LIMIT)).unwrap();
        })
    });
}

fn benchmark_sniffing(c: &mut Criterion) {
    c.bench_function("content_sniffing", |b| {
        b.iter(|| black_box(detect_content_type(black_box(b"<!DOCTYPE html><html>"))))
    });
}

fn benchmark_ssh_ident(c: &mut Criterion) {
    c.bench_function("ssh_ident_parsing", |b| {
        b.iter(|| {
            black_box(parse_ident(black_box(SSH_IDENT))).unwrap();
        })
    });
}

criterion_group!(
    benches,
    benchmark_http_request,
    benchmark_http_response,
    benchmark_sniffing,
    benchmark_ssh_ident
);
criterion_main!(benches);
