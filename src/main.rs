use adc_slurper::{
    args::{convert_filter, Args, Command, ReceiveArgs, ServeArgs},
    capture::receive_session,
    circular::{finite_range, PlotBuffers},
    config::Settings,
    exfil::{AnalysisFileSink, TextFileSink},
    monitoring::{Monitor, StatusEvent},
    pipeline::Pipeline,
    producer::{self, DirectorySource},
    queue::batch_queue,
    session::StopToken,
};
use anyhow::{anyhow, Context};
use clap::Parser;
use crossbeam_channel::Receiver;
use std::{
    net::{Shutdown, TcpListener, TcpStream},
    thread,
};
use tracing::{debug, info, warn};

// Status events buffered for the watcher before we start dropping them
const EVENT_CAPACITY: usize = 1024;
// Log the plot ranges every this many samples
const REDRAW_EVERY: usize = 50;

/// Stand-in for a UI: log what happens and look at the plot windows now and then
fn watch(events: Receiver<StatusEvent>, plots: PlotBuffers) {
    for event in events {
        match event {
            StatusEvent::Configured { interval_ms, mode } => info!(interval_ms, %mode, "Session configured"),
            StatusEvent::BatchQueued { name, samples } => debug!(%name, samples, "Batch queued"),
            StatusEvent::BatchDropped { name } => warn!(%name, "Batch dropped, processing is behind"),
            StatusEvent::SampleProcessed { name, index, total } => {
                if index % REDRAW_EVERY == 0 || index == total {
                    let snapshot = plots.snapshot();
                    debug!(
                        %name,
                        index,
                        total,
                        raw = ?finite_range(&snapshot.raw),
                        filtered = ?finite_range(&snapshot.filtered),
                        "Plot ranges"
                    );
                }
            }
            StatusEvent::BatchFinished { name, samples } => info!(%name, samples, "Batch done"),
            StatusEvent::SessionClosed { terminator } => match terminator {
                Some(sentinel) => info!(%sentinel, "Session closed"),
                None => warn!("Session closed without a control frame"),
            },
        }
    }
}

fn serve(args: ServeArgs, stop: StopToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind((args.bind, args.port))
        .with_context(|| format!("Binding to {}:{}", args.bind, args.port))?;
    info!(addr = %listener.local_addr()?, data_dir = %args.data_dir.display(), "Listening");
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop())?;

    let source = DirectorySource::new(&args.data_dir);
    producer::serve(&listener, &source, &args.mode(), args.interval, &stop)?;
    info!("Server stopped");
    Ok(())
}

fn receive(args: ReceiveArgs, settings: Settings, stop: StopToken) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect((args.host.as_str(), args.port))
        .with_context(|| format!("Connecting to {}:{}", args.host, args.port))?;
    info!(peer = %stream.peer_addr()?, "Connected");

    // Ctrl-C also pulls the socket out from under a blocked read
    let socket = stream.try_clone()?;
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.stop();
        let _ = socket.shutdown(Shutdown::Both);
    })?;

    let (mut sender, mut queue) = batch_queue(settings.queue_capacity);
    let (monitor, events) = Monitor::channel(EVENT_CAPACITY);
    let limits = settings.limits();

    // Start the network thread
    let network = {
        let monitor = monitor.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let result = receive_session(&mut stream, &mut sender, &limits, &monitor, &stop);
            // Dropping the sender is what tells the pipeline we're done
            drop(sender);
            result
        })
    };

    let mut pipeline = Pipeline::new(
        settings.dsp,
        settings.calibration,
        Box::new((
            TextFileSink::new(&args.output_dir),
            AnalysisFileSink::new(&args.analysis_dir),
        )),
        monitor,
    );
    let plots = pipeline.plots();
    let watcher = thread::spawn(move || watch(events, plots));

    // Process on this thread
    let summary = pipeline.run(&mut queue, &stop);
    drop(pipeline);
    info!(
        batches = summary.batches,
        samples = summary.samples,
        persist_failures = summary.persist_failures,
        "Processing finished"
    );

    let received = network.join().map_err(|_| anyhow!("Network thread panicked"))?;
    watcher.join().map_err(|_| anyhow!("Watcher thread panicked"))?;
    let received = received.context("Receive session failed")?;
    info!(
        enqueued = received.batches_enqueued,
        dropped = received.batches_dropped,
        "Session summary"
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Get the CLI options
    let args = Args::parse();
    // Setup logging
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();
    info!("Starting adc_slurper!");

    let settings = Settings::load_or_default(args.config.as_deref()).context("Loading settings")?;
    let stop = StopToken::new();
    match args.command {
        Command::Serve(serve_args) => serve(serve_args, stop),
        Command::Receive(receive_args) => receive(receive_args, settings, stop),
    }
}
