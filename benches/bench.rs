use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cellcnn_he::{
    cellcnn::{
        Activation, CellCnnTransform, Dataset, EvaluationKeys, Kernels, NetworkShape, PackingPlan, PlainWeights,
    },
    multiparty::{CollectiveKeys, Participant, RefreshProtocol, RefreshShare},
    util::{NTTTables, PRNGSeed},
    CKKSEncoder, CoeffModulus, EncryptionParameters, Encryptor, Evaluator, HeContext, KeyGenerator, SecurityLevel,
};
use num_complex::Complex64;
use rand::SeedableRng;

const SCALE: f64 = 1099511627776.0;

fn ckks_benchmark(c: &mut Criterion, log_n: usize) {
    let degree = 1 << log_n;
    let get_name = |name: &str| format!("CKKS 2^{} {}", log_n, name);

    let (chain, _) = CoeffModulus::ckks_chain(degree, 60, 3, 40, 61);
    let tables = NTTTables::new(log_n, &chain[0]).unwrap();
    let mut poly = (0..degree as u64).map(|x| x % chain[0].value()).collect::<Vec<_>>();
    c.bench_function(&get_name("NTT"), |b| b.iter(|| tables.ntt_negacyclic_harvey(black_box(&mut poly))));
    c.bench_function(&get_name("INTT"), |b| b.iter(|| tables.inverse_ntt_negacyclic_harvey(black_box(&mut poly))));

    let context = HeContext::new(EncryptionParameters::ckks(log_n, 3, 40, 60, 61), SecurityLevel::None).unwrap();
    let encoder = CKKSEncoder::new(context.clone());
    let keygen = KeyGenerator::new(context.clone());
    let encryptor = Encryptor::new(context.clone()).set_public_key(keygen.create_public_key());
    let evaluator = Evaluator::new(context.clone());
    let relin_keys = keygen.create_relin_keys();
    let steps = [1, 2, 4, 8, 16];
    let galois_keys = keygen.create_galois_keys_from_steps(&steps);

    let values = (0..encoder.slot_count()).map(|i| Complex64::new(i as f64 / 1000.0, 0.0)).collect::<Vec<_>>();
    c.bench_function(&get_name("Encode"), |b| b.iter(|| encoder.encode_c64_array_new(black_box(&values), 3, SCALE)));
    let plain = encoder.encode_c64_array_new(&values, 3, SCALE);
    c.bench_function(&get_name("Decode"), |b| b.iter(|| encoder.decode_new(black_box(&plain))));

    let cipher = encryptor.encrypt_new(&plain);
    c.bench_function(&get_name("MulRelinRescale"), |b| b.iter(|| {
        let mut product = evaluator.multiply_new(black_box(&cipher), &cipher);
        evaluator.relinearize_inplace(&mut product, &relin_keys);
        evaluator.rescale_to_next_inplace(&mut product);
        product
    }));
    c.bench_function(&get_name("Rotate"), |b| b.iter(|| evaluator.rotate_new(black_box(&cipher), 1, &galois_keys)));
    c.bench_function(&get_name("Rotate x5"), |b| b.iter(|| {
        steps.iter().map(|&s| evaluator.rotate_new(black_box(&cipher), s, &galois_keys)).collect::<Vec<_>>()
    }));
    c.bench_function(&get_name("RotateHoisted x5"), |b| b.iter(|| evaluator.rotate_hoisted(black_box(&cipher), &steps, &galois_keys)));
}

fn criterion_ckks_benchmark(c: &mut Criterion) {
    ckks_benchmark(c, 12);
    ckks_benchmark(c, 14);
}

fn criterion_cellcnn_benchmark(c: &mut Criterion) {
    let parties = 3;
    let context = HeContext::new(EncryptionParameters::ckks(11, 10, 40, 60, 61), SecurityLevel::None).unwrap();
    let shape = NetworkShape { batch: 4, cells: 16, features: 8, filters: 4, classes: 2 };
    let plan = PackingPlan::new(shape, &context).unwrap();
    let seed = PRNGSeed::from_u64(1);
    let participants = (0..parties).map(|i| Participant::new(context.clone(), seed, parties, i)).collect::<Vec<_>>();
    let keys = CollectiveKeys::generate(context.clone(), &participants, plan.galois_elts()).unwrap();
    let encryptor = Encryptor::new(context.clone()).set_public_key(keys.public_key);
    let evaluation_keys = Arc::new(EvaluationKeys { relin_keys: keys.relin_keys, galois_keys: keys.galois_keys });
    let activation = Activation::default().compile().unwrap();
    let kernels = Kernels::new(context.clone(), plan.clone(), SCALE, evaluation_keys, &activation, 0.5, parties).unwrap();

    let data = Dataset::synthetic(shape.batch, shape.cells, shape.features, shape.classes, &seed).unwrap();
    let (batch, labels) = data.batch(&(0..shape.batch).collect::<Vec<_>>());
    let weights = PlainWeights::init(&shape, &mut rand_chacha::ChaCha8Rng::seed_from_u64(3));
    let weights = kernels.packer().encrypt_weights(&encryptor, &weights);
    let previous = kernels.packer().encrypt_weights(&encryptor, &PlainWeights::zeros(&shape));
    let input = kernels.encode_input(&batch);

    c.bench_function("CellCNN Forward", |b| b.iter(|| kernels.forward(black_box(&input), &weights, &previous).unwrap()));

    let pack = kernels.forward(&input, &weights, &previous).unwrap();
    let transform = CellCnnTransform::new(plan, 0.9);
    let protocol = RefreshProtocol::new(context, &seed, 0, 0, SCALE, 12);
    let refresh = || {
        let mut aggregate: Option<RefreshShare> = None;
        for p in &participants {
            let share = protocol.share(p, &pack, &transform);
            match aggregate.as_mut() {
                None => aggregate = Some(share),
                Some(sum) => protocol.aggregate(sum, &share, &pack, p.participant_id).unwrap(),
            }
        }
        protocol.finish(&pack, &aggregate.unwrap(), &transform).unwrap()
    };
    c.bench_function("CellCNN Refresh x3", |b| b.iter(&refresh));

    let refreshed = refresh();
    c.bench_function("CellCNN Backward", |b| b.iter(|| kernels.backward(black_box(&refreshed), &labels, &batch).unwrap()));
}

criterion_group!(bench_ckks, criterion_ckks_benchmark);
criterion_group!(bench_cellcnn, criterion_cellcnn_benchmark);
criterion_main!(bench_ckks, bench_cellcnn);
