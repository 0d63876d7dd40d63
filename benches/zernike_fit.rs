use criterion::*;
use telesim::{metrology::ZernikeWavefront, Builder, FromBuilder, OpdMetrology, PupilGrid};

pub fn zernike_fit(c: &mut Criterion) {
    let metrology = OpdMetrology::builder()
        .pupil(PupilGrid::new(127, 8.36))
        .n_zernike(22)
        .wfs_corners()
        .build()
        .unwrap();
    let wavefront = ZernikeWavefront::new(vec![0., 0., 0., 0.2, 0.1, -0.1, 0.05], 4.18);
    c.bench_function("OPD Zernike fit", |b| {
        b.iter(|| metrology.measure(black_box(&wavefront)))
    });
}

criterion_group!(benches, zernike_fit);
criterion_main!(benches);
