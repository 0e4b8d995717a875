//! Distributed selections checked against the same selection on a local array.

use distarray::distributed::{CpuCluster, DistributedArray, Value};
use distarray::index::{normalize, AxisArg};
use distarray::{logging, ClusterConfig, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SHAPE: [usize; 3] = [7, 5, 6];

const LAYOUTS: [(&[usize], usize); 5] = [
    (&[0], 3),
    (&[1], 5),
    (&[2], 2),
    (&[0, 2], 4),
    (&[0, 1, 2], 6),
];

fn random_arg(rng: &mut StdRng, len: usize) -> AxisArg {
    let n = len as isize;
    if rng.random_bool(0.25) {
        return AxisArg::Index(rng.random_range(-(n as i64)..n as i64) as isize);
    }
    let bound = |rng: &mut StdRng| {
        if rng.random_bool(0.2) {
            None
        } else {
            Some(rng.random_range(-(n as i64) - 2..n as i64 + 2) as isize)
        }
    };
    let start = bound(&mut *rng);
    let stop = bound(&mut *rng);
    let step = [-3, -2, -1, 1, 1, 2, 3][rng.random_range(0..7)];
    AxisArg::Slice {
        start,
        stop,
        step: Some(step),
    }
}

fn random_args(rng: &mut StdRng) -> Vec<AxisArg> {
    SHAPE.iter().map(|&len| random_arg(rng, len)).collect()
}

fn local() -> Tensor<i32> {
    let size: usize = SHAPE.iter().product();
    Tensor::new((0..size as i32).collect(), SHAPE.to_vec()).unwrap()
}

#[test]
fn test_get_matches_local_slice() {
    logging::init();
    let mut rng = StdRng::seed_from_u64(42);
    let local = local();

    for (axes, workers) in LAYOUTS {
        let cluster = CpuCluster::<i32>::new(ClusterConfig::new(workers)).unwrap();
        let ids: Vec<usize> = (0..workers).collect();
        let array = DistributedArray::from_tensor(&cluster, &local, axes, &ids).unwrap();

        for _ in 0..40 {
            let args = random_args(&mut rng);
            let expected = local.slice(&normalize(&SHAPE, &args).unwrap()).unwrap();
            let got = array.get(&args).unwrap().to_tensor().unwrap();
            assert_eq!(got, expected, "{args:?} on axes {axes:?}");
        }
    }
}

#[test]
fn test_set_matches_local_assign() {
    logging::init();
    let mut rng = StdRng::seed_from_u64(1234);

    for (axes, workers) in LAYOUTS {
        let cluster = CpuCluster::<i32>::new(ClusterConfig::new(workers)).unwrap();
        let ids: Vec<usize> = (0..workers).collect();
        let mut expected = local();
        let mut array = DistributedArray::from_tensor(&cluster, &expected, axes, &ids).unwrap();

        for round in 0..20 {
            let args = random_args(&mut rng);
            let entries = normalize(&SHAPE, &args).unwrap();
            let shape = expected.slice(&entries).unwrap().shape().to_vec();
            let size: usize = shape.iter().product();
            let value = Tensor::new((0..size as i32).map(|x| -x - round).collect(), shape).unwrap();

            expected.assign(&entries, &value).unwrap();
            array.set(&args, Value::Tensor(&value)).unwrap();
        }
        assert_eq!(array.gather().unwrap(), expected, "axes {axes:?}");
    }
}

#[test]
fn test_selection_of_selection() {
    logging::init();
    let local = local();
    let cluster = CpuCluster::<i32>::new(ClusterConfig::new(4)).unwrap();
    let array = DistributedArray::from_tensor(&cluster, &local, &[0, 2], &[0, 1, 2, 3]).unwrap();

    let outer = [AxisArg::range(6, 0).step(-1), AxisArg::full(), AxisArg::range(1, 6)];
    let inner = [AxisArg::range(1, 5).step(2), AxisArg::Index(2), AxisArg::full().step(-2)];

    let view = array.get(&outer).unwrap().into_distributed().unwrap();
    let got = view.get(&inner).unwrap().to_tensor().unwrap();

    let first = local.slice(&normalize(&SHAPE, &outer).unwrap()).unwrap();
    let expected = first
        .slice(&normalize(first.shape(), &inner).unwrap())
        .unwrap();
    assert_eq!(got, expected);
}
