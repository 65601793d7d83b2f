use console::Style;
use dcereg_core::manager::{ImageStatus, RegistrationReport};
use dcereg_core::params::{ParameterSet, StageParameters};
use dcereg_core::strategy::ResultCode;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    good: Style,
    warn: Style,
    bad: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            good: Style::new().green(),
            warn: Style::new().yellow(),
            bad: Style::new().red().bold(),
        }
    }
}

pub fn print_parameter_summary(params: &ParameterSet) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("DCE Registration"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(16)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Series"),
        s.value.apply_to(&params.series_name)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Images"),
        s.value.apply_to(format!(
            "{} x {} slice(s), {}",
            params.num_images,
            params.slices_per_image,
            params.dimension()
        ))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Fixed"),
        s.value.apply_to(format!(
            "image {}{}",
            params.index_to_slice_number(params.fixed_image_index),
            if params.flipped_data { " (flipped)" } else { "" }
        ))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Region"),
        s.value.apply_to(params.region)
    );
    if let Some(ref mask) = params.mask {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Mask"),
            s.value.apply_to(format!("{} point polygon", mask.points().len()))
        );
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Sequence"),
        s.method.apply_to(params.sequence())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Threads"),
        s.value.apply_to(params.number_of_threads)
    );
    println!();

    match params.rigid {
        Some(ref stage) => print_stage(&s, "Rigid", stage),
        None => print_disabled(&s, "Rigid"),
    }
    match params.deformable {
        Some(ref stage) => print_stage(&s, "Deformable", stage),
        None => print_disabled(&s, "Deformable"),
    }
}

fn print_disabled(s: &Styles, name: &str) {
    println!(
        "  {:<14}{}",
        s.header.apply_to(name),
        s.disabled.apply_to("disabled")
    );
    println!();
}

fn print_stage(s: &Styles, name: &str, stage: &StageParameters) {
    println!("  {}", s.header.apply_to(name));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(stage.kind)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Metric"),
        s.method.apply_to(stage.metric)
    );
    if let Some(optimizer) = stage.optimizer {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Optimizer"),
            s.method.apply_to(optimizer)
        );
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Levels"),
        s.value.apply_to(stage.num_levels())
    );
    let iterations: Vec<usize> = stage.schedule.iter().map(|l| l.max_iterations).collect();
    println!(
        "    {:<12}{:?}",
        s.label.apply_to("Iterations"),
        s.value.apply_to(iterations)
    );
    println!();
}

pub fn print_report_summary(params: &ParameterSet, report: &RegistrationReport) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Results"));
    for image in &report.images {
        let status = match image.status {
            ImageStatus::Registered(ResultCode::Success) | ImageStatus::Fixed => {
                s.good.apply_to(image.status.to_string())
            }
            ImageStatus::Registered(ResultCode::Failure) | ImageStatus::Cancelled => {
                s.warn.apply_to(image.status.to_string())
            }
            ImageStatus::Registered(ResultCode::Disaster) | ImageStatus::NotProcessed => {
                s.bad.apply_to(image.status.to_string())
            }
        };
        let detail = match (&image.status, &image.stop_condition) {
            (ImageStatus::Fixed, _) => String::new(),
            (_, Some(stop)) => format!("  {} iterations, {}", image.iterations, stop),
            (_, None) => String::new(),
        };
        println!(
            "    {:<12}{}{}",
            s.label.apply_to(format!("Image {}", params.index_to_slice_number(image.index))),
            status,
            s.label.apply_to(detail)
        );
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Series"),
        s.value.apply_to(report.state)
    );
}
