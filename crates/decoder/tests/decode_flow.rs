//! End-to-end decoding tests over the deterministic mock executor
//!
//! The mock treats feature rows as ready-made CTC log probabilities
//! (identity encoder, subsampling 1), which makes streaming and batch
//! results exactly comparable.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ndarray::Array2;

use asr_core::SymbolTable;
use asr_decoder::{
    BatchRecognizer, CtcSearchConfig, DecodeOptions, DecodeState, EndpointConfig,
    StreamingDecoder,
};
use asr_frontend::{FbankConfig, FeaturePipeline};
use asr_model::mock::MockAsrModel;
use asr_model::AsrModel;

const VOCAB: usize = 8;

fn symbols() -> Arc<SymbolTable> {
    Arc::new(SymbolTable::from_tokens(vec![
        "<blank>".to_string(),
        "▁he".to_string(),
        "llo".to_string(),
        "▁world".to_string(),
        "▁one".to_string(),
        "▁two".to_string(),
        "<sos>".to_string(),
        "<eos>".to_string(),
    ]))
}

fn model() -> Arc<dyn AsrModel> {
    Arc::new(MockAsrModel::new(VOCAB))
}

fn pipeline() -> Arc<FeaturePipeline> {
    Arc::new(FeaturePipeline::new(FbankConfig {
        num_bins: VOCAB,
        ..Default::default()
    }))
}

fn options() -> DecodeOptions {
    DecodeOptions {
        chunk_size: 4,
        nbest: 3,
        timestamp: true,
        ctc_weight: 0.5,
        reverse_weight: 0.0,
        search: CtcSearchConfig::default(),
        endpoint: EndpointConfig {
            trailing_silence_frames: 6,
            max_silence_after_speech_ms: 60_000,
        },
    }
}

/// A frame dominated by one label
fn frame(label: usize, prob: f32) -> Vec<f32> {
    let rest = (1.0 - prob) / (VOCAB - 1) as f32;
    (0..VOCAB)
        .map(|v| if v == label { prob.ln() } else { rest.ln() })
        .collect()
}

fn silence(n: usize) -> Vec<Vec<f32>> {
    vec![frame(0, 0.9); n]
}

/// Frames spelling "hello world" (tokens 1, 2, 3)
fn hello_world() -> Vec<Vec<f32>> {
    let mut frames = Vec::new();
    frames.push(frame(1, 0.9));
    frames.push(frame(0, 0.9));
    frames.push(frame(2, 0.9));
    frames.push(frame(0, 0.9));
    frames.push(frame(3, 0.9));
    frames.extend(silence(3));
    frames
}

fn drive_to_endpoint(decoder: &mut StreamingDecoder) -> Vec<Option<String>> {
    let mut partials = Vec::new();
    loop {
        let outcome = decoder.advance().expect("advance failed");
        partials.push(outcome.partial);
        match outcome.state {
            DecodeState::EndpointReached => return partials,
            DecodeState::Terminated => panic!("unexpected termination"),
            _ => {}
        }
    }
}

#[test]
fn test_single_utterance_with_timestamps() {
    let pipeline = pipeline();
    pipeline.accept_frames(hello_world());
    pipeline.set_input_finished();

    let mut decoder = StreamingDecoder::new(
        model(),
        symbols(),
        pipeline,
        None,
        options(),
        Arc::new(AtomicBool::new(false)),
    );

    let partials = drive_to_endpoint(&mut decoder);
    let emitted: Vec<String> = partials.into_iter().flatten().collect();
    assert!(!emitted.is_empty());

    let hyps = decoder.finalize_utterance().unwrap();
    assert_eq!(hyps[0].sentence, "hello world");

    let pieces = &hyps[0].word_pieces;
    assert_eq!(pieces.len(), 3);
    assert_eq!(pieces[0].start, 0);
    assert!(pieces.windows(2).all(|w| w[0].start <= w[1].start));
    // Utterance is 8 frames x 10ms.
    assert!(pieces.last().unwrap().end <= 80);
}

#[test]
fn test_empty_utterance() {
    let pipeline = pipeline();
    pipeline.set_input_finished();

    let mut decoder = StreamingDecoder::new(
        model(),
        symbols(),
        pipeline,
        None,
        options(),
        Arc::new(AtomicBool::new(false)),
    );

    let partials = drive_to_endpoint(&mut decoder);
    assert!(partials.iter().all(|p| p.is_none()));

    let hyps = decoder.finalize_utterance().unwrap();
    assert!(!hyps.is_empty());
    assert_eq!(hyps[0].sentence, "");
    assert!(hyps[0].tokens.is_empty());
}

#[test]
fn test_endpoint_then_continuous_reset() {
    let pipeline = pipeline();

    // "one" followed by trailing silence long enough to endpoint.
    let mut first = vec![frame(4, 0.9), frame(4, 0.9)];
    first.extend(silence(14));
    pipeline.accept_frames(first);

    let mut decoder = StreamingDecoder::new(
        model(),
        symbols(),
        pipeline.clone(),
        None,
        options(),
        Arc::new(AtomicBool::new(false)),
    );

    drive_to_endpoint(&mut decoder);
    assert!(!pipeline.input_finished());
    let hyps = decoder.finalize_utterance().unwrap();
    assert_eq!(hyps[0].sentence, "one");

    // Rearm and decode the next utterance on the same session.
    decoder.reset_utterance();
    let mut second = vec![frame(5, 0.9), frame(5, 0.9)];
    second.extend(silence(2));
    pipeline.accept_frames(second);
    pipeline.set_input_finished();

    drive_to_endpoint(&mut decoder);
    let hyps = decoder.finalize_utterance().unwrap();
    assert_eq!(hyps[0].sentence, "two");
}

#[test]
fn test_cancellation_unblocks_reader() {
    let pipeline = pipeline();
    let stop = Arc::new(AtomicBool::new(false));

    let mut decoder = StreamingDecoder::new(
        model(),
        symbols(),
        pipeline.clone(),
        None,
        options(),
        stop.clone(),
    );

    let worker = std::thread::spawn(move || loop {
        let outcome = decoder.advance().expect("advance failed");
        match outcome.state {
            DecodeState::Terminated => return true,
            DecodeState::EndpointReached => return false,
            _ => {}
        }
    });

    // Let the worker block in the feature pipeline, then cancel.
    std::thread::sleep(std::time::Duration::from_millis(50));
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    pipeline.set_input_finished();

    assert!(worker.join().unwrap(), "worker must unwind via Terminated");
}

#[test]
fn test_streaming_matches_batch() {
    let utterances: Vec<Vec<Vec<f32>>> = vec![
        hello_world(),
        {
            let mut f = vec![frame(4, 0.9)];
            f.extend(silence(2));
            f
        },
        {
            let mut f = vec![frame(5, 0.9), frame(0, 0.9), frame(5, 0.9)];
            f.extend(silence(4));
            f
        },
    ];

    // Batch path.
    let matrices: Vec<Array2<f32>> = utterances
        .iter()
        .map(|frames| {
            Array2::from_shape_fn((frames.len(), VOCAB), |(i, j)| frames[i][j])
        })
        .collect();
    let recognizer = BatchRecognizer::new(model(), symbols(), None, options(), 10);
    let batch_results = recognizer.recognize(&matrices).unwrap();
    assert_eq!(batch_results.len(), 3);

    // Streaming path, one utterance at a time.
    for (frames, batch_nbest) in utterances.iter().zip(&batch_results) {
        let pipeline = pipeline();
        pipeline.accept_frames(frames.clone());
        pipeline.set_input_finished();

        let mut decoder = StreamingDecoder::new(
            model(),
            symbols(),
            pipeline,
            None,
            options(),
            Arc::new(AtomicBool::new(false)),
        );
        drive_to_endpoint(&mut decoder);
        let streaming_nbest = decoder.finalize_utterance().unwrap();

        assert_eq!(streaming_nbest[0].sentence, batch_nbest[0].sentence);
        assert_eq!(streaming_nbest[0].tokens, batch_nbest[0].tokens);
        assert!((streaming_nbest[0].score - batch_nbest[0].score).abs() < 1e-3);
    }
}

#[test]
fn test_context_biasing_flips_top1() {
    // Tokens 1 ("▁he") and 3 ("▁world") compete; biasing "he llo" wins.
    let frames = vec![
        {
            let mut f = frame(3, 0.5);
            f[1] = 0.4f32.ln();
            f
        },
        frame(2, 0.9),
        frame(0, 0.9),
    ];

    let run = |context: Option<Arc<asr_decoder::ContextGraph>>| {
        let pipeline = pipeline();
        pipeline.accept_frames(frames.clone());
        pipeline.set_input_finished();
        let mut decoder = StreamingDecoder::new(
            model(),
            symbols(),
            pipeline,
            context,
            DecodeOptions {
                // CTC only, so the effect is attributable to the graph.
                ctc_weight: 1.0,
                ..options()
            },
            Arc::new(AtomicBool::new(false)),
        );
        drive_to_endpoint(&mut decoder);
        decoder.finalize_utterance().unwrap()
    };

    let unbiased = run(None);
    assert_eq!(unbiased[0].tokens[0], 3);

    let graph = Arc::new(asr_decoder::ContextGraph::from_phrases(
        &["hello".to_string()],
        3.0,
        &symbols(),
    ));
    let biased = run(Some(graph));
    assert_eq!(biased[0].sentence, "hello");
}
