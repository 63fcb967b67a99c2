//! Property-based tests for upload assembly

use proptest::prelude::*;
use std::io::Cursor;
use upstitch_engine::*;

fn parts_and_order() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<usize>)> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..12)
        .prop_flat_map(|parts| {
            let order: Vec<usize> = (0..parts.len()).collect();
            (Just(parts), Just(order).prop_shuffle())
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn props_any_arrival_order_assembles_in_index_order((parts, order) in parts_and_order()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (config, _temp) = UploadConfig::temp().unwrap();
            let assembler = UploadAssembler::new(config).unwrap();
            let total = parts.len();

            for index in &order {
                let request = UploadRequest::multipart(Cursor::new(parts[*index].clone()))
                    .with_param(PARAM_PART_INDEX, index.to_string())
                    .with_param(PARAM_TOTAL_PARTS, total.to_string())
                    .with_param(PARAM_UPLOAD_ID, "prop-upload")
                    .with_param(PARAM_FILE_NAME, "assembled.bin");
                let outcome = assembler.handle_upload(request).await;
                assert!(outcome.is_success(), "{:?}", outcome);
            }

            let assembled = std::fs::read(assembler.config().upload_dir.join("assembled.bin")).unwrap();
            assert_eq!(assembled, parts.concat());

            let leftovers = assembler
                .store()
                .list_parts(&upstitch_core::UploadId::new("prop-upload").unwrap())
                .await
                .unwrap();
            assert!(leftovers.is_empty());
        });
    }
}
